//! Catalogue of component classes available to sitemaps.
//!
//! # Responsibilities
//! - Map a class name (the `src` of a declaration) to its role, factory
//!   and declared concurrency capability
//! - Reject declarations naming unknown classes or the wrong role
//!
//! # Design Decisions
//! - Capabilities are declared explicitly when a class is registered,
//!   never discovered from the type at runtime
//! - Catalogue is immutable once handed to a processor (shared via Arc)

use std::collections::HashMap;
use std::sync::Arc;

use crate::components::{
    builtin, Action, Generator, Parameters, Reader, Role, Serializer, Stage, Transformer,
};
use crate::error::ConfigurationError;
use crate::sitemap::Location;

/// Concurrency capability a class declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Safe for unsynchronized concurrent use: one shared instance.
    ThreadSafe,
    /// Reusable but not concurrently: instances are pooled.
    Poolable,
    /// Neither: a fresh instance per use.
    SingleThreaded,
}

/// Creates a configured instance from the declaration's parameters.
pub type Factory<T> = Arc<dyn Fn(&Parameters) -> Box<T> + Send + Sync>;

/// A registered class of one role.
pub struct ComponentClass<T: ?Sized> {
    pub name: String,
    pub capability: Capability,
    pub factory: Factory<T>,
}

impl<T: ?Sized> std::fmt::Debug for ComponentClass<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentClass")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Clone for ComponentClass<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capability: self.capability,
            factory: self.factory.clone(),
        }
    }
}

/// A class of any role.
pub enum ClassEntry {
    Generator(ComponentClass<dyn Generator>),
    Transformer(ComponentClass<dyn Transformer>),
    Serializer(ComponentClass<dyn Serializer>),
    Reader(ComponentClass<dyn Reader>),
    Action(ComponentClass<dyn Action>),
}

impl ClassEntry {
    pub fn role(&self) -> Role {
        match self {
            ClassEntry::Generator(_) => Role::Generator,
            ClassEntry::Transformer(_) => Role::Transformer,
            ClassEntry::Serializer(_) => Role::Serializer,
            ClassEntry::Reader(_) => Role::Reader,
            ClassEntry::Action(_) => Role::Action,
        }
    }
}

/// Class name → class.
#[derive(Default)]
pub struct ComponentCatalogue {
    classes: HashMap<String, ClassEntry>,
}

impl ComponentCatalogue {
    /// An empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue holding the built-in components.
    pub fn with_builtins() -> Self {
        let mut catalogue = Self::new();
        builtin::register_all(&mut catalogue);
        catalogue
    }

    /// Register a class. A later registration under the same name replaces the earlier one.
    pub fn register<T, F>(&mut self, class: &str, capability: Capability, factory: F)
    where
        T: Stage + ?Sized,
        F: Fn(&Parameters) -> Box<T> + Send + Sync + 'static,
    {
        let entry = T::wrap(ComponentClass {
            name: class.to_string(),
            capability,
            factory: Arc::new(factory),
        });
        if self.classes.insert(class.to_string(), entry).is_some() {
            tracing::debug!(class = %class, "Replaced component class");
        }
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// Look up a class for role `T`.
    pub fn class<T: Stage + ?Sized>(
        &self,
        class: &str,
        location: &Location,
    ) -> Result<ComponentClass<T>, ConfigurationError> {
        let entry = self
            .classes
            .get(class)
            .ok_or_else(|| ConfigurationError::UnknownClass {
                role: T::ROLE,
                class: class.to_string(),
                location: location.clone(),
            })?;
        T::entry(entry)
            .cloned()
            .ok_or_else(|| ConfigurationError::RoleMismatch {
                class: class.to_string(),
                expected: T::ROLE,
                actual: entry.role(),
                location: location.clone(),
            })
    }
}

impl std::fmt::Debug for ComponentCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .classes
            .iter()
            .map(|(name, entry)| format!("{}:{}", entry.role(), name))
            .collect();
        names.sort();
        f.debug_struct("ComponentCatalogue").field("classes", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalogue = ComponentCatalogue::with_builtins();
        let loc = Location::unknown();
        let class = catalogue.class::<dyn Generator>("file", &loc).unwrap();
        assert_eq!(class.capability, Capability::ThreadSafe);
        assert!(catalogue.class::<dyn Transformer>("wrap", &loc).is_ok());
    }

    #[test]
    fn test_unknown_class_is_named() {
        let catalogue = ComponentCatalogue::with_builtins();
        let err = catalogue
            .class::<dyn Generator>("com.example.Missing", &Location::unknown())
            .unwrap_err();
        assert!(err.to_string().contains("com.example.Missing"));
    }

    #[test]
    fn test_role_mismatch() {
        let catalogue = ComponentCatalogue::with_builtins();
        let err = catalogue
            .class::<dyn Generator>("xml", &Location::unknown())
            .unwrap_err();
        match err {
            ConfigurationError::RoleMismatch { expected, actual, .. } => {
                assert_eq!(expected, Role::Generator);
                assert_eq!(actual, Role::Serializer);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
