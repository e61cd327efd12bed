//! The pipeline under construction for one request.

use crate::components::roles::StageSetup;
use crate::components::{Generator, Lease, Reader, Role, Serializer, Stage, Transformer};
use crate::error::{BoxError, ProcessingError};
use crate::invoke::Environment;

struct Binding<T: ?Sized + Stage> {
    lease: Lease<T>,
    setup: StageSetup,
}

struct Terminal<T: ?Sized + Stage> {
    binding: Binding<T>,
    mime_type: Option<String>,
    status: Option<u16>,
}

/// generator → transformers → serializer, or a single reader.
#[derive(Default)]
pub struct ProcessingPipeline {
    generator: Option<Binding<dyn Generator>>,
    transformers: Vec<Binding<dyn Transformer>>,
    serializer: Option<Terminal<dyn Serializer>>,
    reader: Option<Terminal<dyn Reader>>,
}

impl ProcessingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_generator(
        &mut self,
        lease: Lease<dyn Generator>,
        setup: StageSetup,
    ) -> Result<(), ProcessingError> {
        if self.generator.is_some() {
            return Err(ProcessingError::StageConflict(Role::Generator));
        }
        if self.reader.is_some() {
            return Err(ProcessingError::StageConflict(Role::Reader));
        }
        self.generator = Some(Binding { lease, setup });
        Ok(())
    }

    pub fn add_transformer(
        &mut self,
        lease: Lease<dyn Transformer>,
        setup: StageSetup,
    ) -> Result<(), ProcessingError> {
        if self.generator.is_none() {
            return Err(ProcessingError::IncompletePipeline(
                "transformer added before a generator".into(),
            ));
        }
        if self.serializer.is_some() {
            return Err(ProcessingError::StageConflict(Role::Serializer));
        }
        self.transformers.push(Binding { lease, setup });
        Ok(())
    }

    pub fn set_serializer(
        &mut self,
        lease: Lease<dyn Serializer>,
        setup: StageSetup,
        mime_type: Option<String>,
        status: Option<u16>,
    ) -> Result<(), ProcessingError> {
        if self.generator.is_none() {
            return Err(ProcessingError::IncompletePipeline(
                "serializer added before a generator".into(),
            ));
        }
        if self.serializer.is_some() {
            return Err(ProcessingError::StageConflict(Role::Serializer));
        }
        self.serializer = Some(Terminal {
            binding: Binding { lease, setup },
            mime_type,
            status,
        });
        Ok(())
    }

    pub fn set_reader(
        &mut self,
        lease: Lease<dyn Reader>,
        setup: StageSetup,
        mime_type: Option<String>,
        status: Option<u16>,
    ) -> Result<(), ProcessingError> {
        if self.generator.is_some() {
            return Err(ProcessingError::StageConflict(Role::Generator));
        }
        if self.reader.is_some() {
            return Err(ProcessingError::StageConflict(Role::Reader));
        }
        self.reader = Some(Terminal {
            binding: Binding { lease, setup },
            mime_type,
            status,
        });
        Ok(())
    }

    /// True once a serializer or reader is attached.
    pub fn is_complete(&self) -> bool {
        self.reader.is_some() || (self.generator.is_some() && self.serializer.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.generator.is_none() && self.reader.is_none()
    }

    /// `role:src` of every stage, in execution order.
    pub fn describe(&self) -> Vec<String> {
        fn label<T: ?Sized + Stage>(b: &Binding<T>) -> String {
            match &b.setup.src {
                Some(src) => format!("{}:{}", T::ROLE, src),
                None => T::ROLE.to_string(),
            }
        }
        let mut out = Vec::new();
        if let Some(r) = &self.reader {
            out.push(label(&r.binding));
        }
        if let Some(g) = &self.generator {
            out.push(label(g));
        }
        out.extend(self.transformers.iter().map(label));
        if let Some(s) = &self.serializer {
            out.push(label(&s.binding));
        }
        out
    }

    /// Run the pipeline, writing body, mime type and status into the response.
    pub fn process(&self, env: &mut Environment) -> Result<(), ProcessingError> {
        let mut body = Vec::new();

        let (mime_type, status) = if let Some(reader) = &self.reader {
            let b = &reader.binding;
            let detected = b
                .lease
                .read(&b.setup, env, &mut body)
                .map_err(|e| wrap(Role::Reader, &b.setup, e))?;
            (reader.mime_type.clone().or(detected), reader.status)
        } else {
            let generator = self
                .generator
                .as_ref()
                .ok_or_else(|| ProcessingError::IncompletePipeline("no generator".into()))?;
            let serializer = self
                .serializer
                .as_ref()
                .ok_or_else(|| ProcessingError::IncompletePipeline("no serializer".into()))?;

            let mut events = generator
                .lease
                .generate(&generator.setup, env)
                .map_err(|e| wrap(Role::Generator, &generator.setup, e))?;
            for t in &self.transformers {
                events = t
                    .lease
                    .transform(&t.setup, env, events)
                    .map_err(|e| wrap(Role::Transformer, &t.setup, e))?;
            }
            let s = &serializer.binding;
            s.lease
                .serialize(&s.setup, &events, &mut body)
                .map_err(|e| wrap(Role::Serializer, &s.setup, e))?;
            let mime = serializer
                .mime_type
                .clone()
                .unwrap_or_else(|| s.lease.mime_type().to_string());
            (Some(mime), serializer.status)
        };

        tracing::debug!(uri = %env.full_uri(), stages = ?self.describe(), bytes = body.len(), "Pipeline processed");
        let response = env.response_mut();
        response.body = body;
        if mime_type.is_some() {
            response.mime_type = mime_type;
        }
        if status.is_some() {
            response.status = status;
        }
        Ok(())
    }
}

/// Missing sources pass through unwrapped so the caller can report "not found".
fn wrap(role: Role, setup: &StageSetup, err: BoxError) -> ProcessingError {
    match err.downcast::<ProcessingError>() {
        Ok(inner) if matches!(*inner, ProcessingError::SourceNotFound { .. }) => *inner,
        Ok(inner) => {
            let source: BoxError = inner;
            ProcessingError::stage(role, setup.src_or_empty(), source)
        }
        Err(other) => ProcessingError::stage(role, setup.src_or_empty(), other),
    }
}
