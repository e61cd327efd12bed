//! Component holders: one declared component plus its lifecycle strategy.

use std::ops::Deref;
use std::sync::Arc;

use crate::components::catalogue::{Capability, ComponentClass, Factory};
use crate::components::pool::{Pool, PoolGuard, PoolSettings};
use crate::components::{Parameters, Stage};
use crate::error::ProcessingError;

/// How instances of a declared component are managed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// New instance on every `get`.
    PerCall,
    /// Bounded pool.
    Pooled { min: usize, max: usize },
    /// One instance shared by every caller.
    Singleton,
}

impl Strategy {
    /// The fixed capability → strategy table.
    pub fn for_capability(capability: Capability, pool: PoolSettings) -> Self {
        match capability {
            Capability::ThreadSafe => Strategy::Singleton,
            Capability::Poolable => Strategy::Pooled {
                min: pool.min,
                max: pool.max,
            },
            Capability::SingleThreaded => Strategy::PerCall,
        }
    }
}

enum Instances<T: ?Sized + Stage> {
    PerCall {
        factory: Factory<T>,
        config: Parameters,
    },
    Pooled(Arc<Pool<T>>),
    Singleton(Arc<T>),
}

/// A named binding from a hint to a component class and strategy.
pub struct ComponentHolder<T: ?Sized + Stage> {
    hint: String,
    class: String,
    strategy: Strategy,
    mime_type: Option<String>,
    instances: Instances<T>,
}

impl<T: ?Sized + Stage> ComponentHolder<T> {
    /// Bind `hint` to `class`. Singletons are built immediately.
    pub fn new(
        hint: impl Into<String>,
        class: ComponentClass<T>,
        config: Parameters,
        pool: PoolSettings,
    ) -> Self {
        let hint = hint.into();
        let strategy = Strategy::for_capability(class.capability, pool);
        let instances = match strategy {
            Strategy::PerCall => Instances::PerCall {
                factory: class.factory.clone(),
                config,
            },
            Strategy::Pooled { .. } => {
                let factory = class.factory.clone();
                let name = format!("{}:{}", T::ROLE, hint);
                Instances::Pooled(Arc::new(Pool::new(name, pool, move || factory(&config))))
            }
            Strategy::Singleton => Instances::Singleton(Arc::from((class.factory)(&config))),
        };
        tracing::debug!(role = %T::ROLE, hint = %hint, class = %class.name, strategy = ?strategy, "Component registered");
        Self {
            hint,
            class: class.name,
            strategy,
            mime_type: None,
            instances,
        }
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Mime type declared on the component, overriding the component's own.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Obtain an instance. Dropping the lease is the matching `put`.
    pub fn get(&self) -> Result<Lease<T>, ProcessingError> {
        match &self.instances {
            Instances::PerCall { factory, config } => Ok(Lease::Owned(factory(config))),
            Instances::Pooled(pool) => pool.acquire().map(Lease::Pooled),
            Instances::Singleton(instance) => Ok(Lease::Shared(Arc::clone(instance))),
        }
    }

    /// Post-build setup: prewarm pooled instances.
    pub fn initialize(&self) {
        if let Instances::Pooled(pool) = &self.instances {
            pool.prewarm();
        }
    }

    pub fn dispose(&self) {
        if let Instances::Pooled(pool) = &self.instances {
            pool.close();
        }
        tracing::debug!(role = %T::ROLE, hint = %self.hint, "Component disposed");
    }

    /// Live pooled instances, for diagnostics.
    pub fn pooled_live(&self) -> Option<usize> {
        match &self.instances {
            Instances::Pooled(pool) => Some(pool.live()),
            _ => None,
        }
    }
}

impl<T: ?Sized + Stage> std::fmt::Debug for ComponentHolder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHolder")
            .field("role", &T::ROLE)
            .field("hint", &self.hint)
            .field("class", &self.class)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A component instance in use.
pub enum Lease<T: ?Sized + Stage> {
    Owned(Box<T>),
    Pooled(PoolGuard<T>),
    Shared(Arc<T>),
}

impl<T: ?Sized + Stage> Deref for Lease<T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            Lease::Owned(item) => item,
            Lease::Pooled(guard) => guard,
            Lease::Shared(item) => item,
        }
    }
}
