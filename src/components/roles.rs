//! Role traits implemented by pipeline components.

use std::io::Write;
use std::sync::Arc;

use crate::components::{Component, Parameters};
use crate::error::{BoxError, ProcessingError};
use crate::invoke::{Environment, ParameterMap};
use crate::pipeline::Event;
use crate::source::{Source, SourceResolver};

/// Per-invocation configuration of a stage: resolved `src` and parameters.
#[derive(Clone)]
pub struct StageSetup {
    pub src: Option<String>,
    pub parameters: Parameters,
    pub sources: Arc<dyn SourceResolver>,
    /// URI of the sitemap that declared the stage; relative `src` values resolve against it.
    pub base: String,
}

impl StageSetup {
    pub fn new(sources: Arc<dyn SourceResolver>, base: impl Into<String>) -> Self {
        Self {
            src: None,
            parameters: Parameters::new(),
            sources,
            base: base.into(),
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn src_or_empty(&self) -> &str {
        self.src.as_deref().unwrap_or("")
    }

    /// Resolve `src` against the declaring sitemap.
    pub fn resolve_src(&self) -> Result<Box<dyn Source>, ProcessingError> {
        let src = self
            .src
            .as_deref()
            .ok_or_else(|| ProcessingError::IncompletePipeline("stage has no src".into()))?;
        self.sources.resolve(src, Some(&self.base))
    }
}

impl std::fmt::Debug for StageSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSetup")
            .field("src", &self.src)
            .field("parameters", &self.parameters)
            .field("base", &self.base)
            .finish()
    }
}

/// Produces the event stream that starts a pipeline.
pub trait Generator: Component {
    fn generate(&self, setup: &StageSetup, env: &Environment) -> Result<Vec<Event>, BoxError>;
}

/// Rewrites an event stream.
pub trait Transformer: Component {
    fn transform(
        &self,
        setup: &StageSetup,
        env: &Environment,
        input: Vec<Event>,
    ) -> Result<Vec<Event>, BoxError>;
}

/// Turns the final event stream into bytes.
pub trait Serializer: Component {
    fn serialize(&self, setup: &StageSetup, events: &[Event], out: &mut dyn Write) -> Result<(), BoxError>;

    fn mime_type(&self) -> &str;
}

/// Streams a resource directly, bypassing the event pipeline.
pub trait Reader: Component {
    /// Write the resource, returning its mime type when known.
    fn read(&self, setup: &StageSetup, env: &Environment, out: &mut dyn Write) -> Result<Option<String>, BoxError>;
}

/// Side-effecting step that may enable a block of the sitemap.
pub trait Action: Component {
    /// `Some(map)` runs the enclosed nodes with `map` pushed; `None` skips them.
    fn act(&self, setup: &StageSetup, env: &mut Environment) -> Result<Option<ParameterMap>, BoxError>;
}
