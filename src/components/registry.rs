//! Per-sitemap component registry.
//!
//! # Responsibilities
//! - Hold the holders declared in one sitemap's `components` section
//! - Resolve a hint (or the role default) to a holder at build time
//! - Fall back to the parent sitemap's registry for undeclared hints

use std::collections::HashMap;
use std::sync::Arc;

use crate::components::{
    Action, ComponentHolder, Generator, Reader, Serializer, Stage, Transformer,
};
use crate::error::ConfigurationError;
use crate::sitemap::Location;

/// Holders of one role, keyed by hint.
pub struct RoleTable<T: ?Sized + Stage> {
    holders: HashMap<String, Arc<ComponentHolder<T>>>,
    order: Vec<String>,
    default: Option<String>,
}

impl<T: ?Sized + Stage> Default for RoleTable<T> {
    fn default() -> Self {
        Self {
            holders: HashMap::new(),
            order: Vec::new(),
            default: None,
        }
    }
}

impl<T: ?Sized + Stage> RoleTable<T> {
    pub fn get(&self, hint: &str) -> Option<&Arc<ComponentHolder<T>>> {
        self.holders.get(hint)
    }

    /// Explicit default, or the first declared hint.
    pub fn default_hint(&self) -> Option<&str> {
        self.default
            .as_deref()
            .or_else(|| self.order.first().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Holders in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComponentHolder<T>>> {
        self.order.iter().filter_map(|hint| self.holders.get(hint))
    }
}

/// The components visible to one compiled tree.
#[derive(Default)]
pub struct ComponentRegistry {
    pub(crate) generators: RoleTable<dyn Generator>,
    pub(crate) transformers: RoleTable<dyn Transformer>,
    pub(crate) serializers: RoleTable<dyn Serializer>,
    pub(crate) readers: RoleTable<dyn Reader>,
    pub(crate) actions: RoleTable<dyn Action>,
    parent: Option<Arc<ComponentRegistry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of a mounted sitemap, falling back to `parent`.
    pub fn with_parent(parent: Arc<ComponentRegistry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<&Arc<ComponentRegistry>> {
        self.parent.as_ref()
    }

    pub fn table<T: ?Sized + Stage>(&self) -> &RoleTable<T> {
        T::table(self)
    }

    /// Add a holder. Hints are unique per role within one sitemap.
    pub fn insert<T: ?Sized + Stage>(
        &mut self,
        holder: ComponentHolder<T>,
        location: &Location,
    ) -> Result<Arc<ComponentHolder<T>>, ConfigurationError> {
        let table = T::table_mut(self);
        let hint = holder.hint().to_string();
        if table.holders.contains_key(&hint) {
            return Err(ConfigurationError::Duplicate {
                kind: T::ROLE.to_string(),
                name: hint,
                location: location.clone(),
            });
        }
        let holder = Arc::new(holder);
        table.order.push(hint.clone());
        table.holders.insert(hint, Arc::clone(&holder));
        Ok(holder)
    }

    pub fn set_default<T: ?Sized + Stage>(&mut self, hint: impl Into<String>) {
        T::table_mut(self).default = Some(hint.into());
    }

    /// Default hint for a role, searching parents when this sitemap declares none.
    pub fn default_hint<T: ?Sized + Stage>(&self) -> Option<&str> {
        T::table(self)
            .default_hint()
            .or_else(|| self.parent.as_ref().and_then(|p| p.default_hint::<T>()))
    }

    /// Resolve `hint` (or the role default when `None`) to a holder.
    pub fn holder<T: ?Sized + Stage>(
        &self,
        hint: Option<&str>,
        location: &Location,
    ) -> Result<Arc<ComponentHolder<T>>, ConfigurationError> {
        let hint = match hint.or_else(|| self.default_hint::<T>()) {
            Some(hint) => hint,
            None => {
                return Err(ConfigurationError::UnknownComponent {
                    role: T::ROLE,
                    hint: "(default)".to_string(),
                    location: location.clone(),
                })
            }
        };
        self.lookup::<T>(hint)
            .ok_or_else(|| ConfigurationError::UnknownComponent {
                role: T::ROLE,
                hint: hint.to_string(),
                location: location.clone(),
            })
    }

    fn lookup<T: ?Sized + Stage>(&self, hint: &str) -> Option<Arc<ComponentHolder<T>>> {
        T::table(self)
            .get(hint)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.lookup::<T>(hint)))
    }

    /// Number of holders declared in this sitemap (parents excluded).
    pub fn len(&self) -> usize {
        self.generators.len()
            + self.transformers.len()
            + self.serializers.len()
            + self.readers.len()
            + self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("declared", &self.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentCatalogue, Parameters, PoolSettings};

    fn generator(catalogue: &ComponentCatalogue, hint: &str, class: &str) -> ComponentHolder<dyn Generator> {
        let class = catalogue
            .class::<dyn Generator>(class, &Location::unknown())
            .unwrap();
        ComponentHolder::new(hint, class, Parameters::new(), PoolSettings::default())
    }

    #[test]
    fn test_default_and_explicit_hints() {
        let catalogue = ComponentCatalogue::with_builtins();
        let loc = Location::unknown();
        let mut registry = ComponentRegistry::new();
        registry.insert(generator(&catalogue, "file", "file"), &loc).unwrap();
        registry.insert(generator(&catalogue, "req", "request"), &loc).unwrap();

        assert_eq!(registry.holder::<dyn Generator>(None, &loc).unwrap().hint(), "file");
        registry.set_default::<dyn Generator>("req");
        assert_eq!(registry.holder::<dyn Generator>(None, &loc).unwrap().hint(), "req");
        assert_eq!(registry.holder::<dyn Generator>(Some("file"), &loc).unwrap().class(), "file");
    }

    #[test]
    fn test_duplicate_hint_rejected() {
        let catalogue = ComponentCatalogue::with_builtins();
        let loc = Location::unknown();
        let mut registry = ComponentRegistry::new();
        registry.insert(generator(&catalogue, "g", "file"), &loc).unwrap();
        let err = registry.insert(generator(&catalogue, "g", "request"), &loc).unwrap_err();
        assert!(matches!(err, ConfigurationError::Duplicate { .. }));
    }

    #[test]
    fn test_parent_fallback() {
        let catalogue = ComponentCatalogue::with_builtins();
        let loc = Location::unknown();
        let mut parent = ComponentRegistry::new();
        parent.insert(generator(&catalogue, "file", "file"), &loc).unwrap();
        let child = ComponentRegistry::with_parent(Arc::new(parent));

        assert!(child.is_empty());
        assert_eq!(child.holder::<dyn Generator>(None, &loc).unwrap().hint(), "file");
        let err = child.holder::<dyn Serializer>(None, &loc).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownComponent { .. }));
    }
}
