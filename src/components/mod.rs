//! Pipeline components and their lifecycle strategies.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     ComponentCatalogue (class name → capability + factory)
//!
//! Tree build:
//!     <components> declarations
//!         → holder.rs (Strategy chosen from capability)
//!         → registry.rs (hint → holder, per sitemap, parent fallback)
//!
//! Request:
//!     stage node → holder.get() → Lease (Owned | Pooled | Shared)
//!         → attached to the pipeline
//!         → dropped with the InvokeContext → pooled instance returned
//! ```
//!
//! # Design Decisions
//! - Strategy fixed at registration: ThreadSafe → Singleton,
//!   Poolable → Pooled, SingleThreaded → PerCall
//! - Stage calls take `&self`, so one singleton serves concurrent requests
//! - Pooled leases return themselves on drop; a lease can't leak

pub mod builtin;
pub mod catalogue;
pub mod holder;
pub mod pool;
pub mod registry;
pub mod roles;

use std::collections::BTreeMap;
use std::fmt;

pub use catalogue::{Capability, ClassEntry, ComponentCatalogue, ComponentClass, Factory};
pub use holder::{ComponentHolder, Lease, Strategy};
pub use pool::{Pool, PoolGuard, PoolSettings};
pub use registry::{ComponentRegistry, RoleTable};
pub use roles::{Action, Generator, Reader, Serializer, StageSetup, Transformer};

/// Configuration and per-request parameters handed to components.
pub type Parameters = BTreeMap<String, String>;

/// The pipeline roles a component can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Generator,
    Transformer,
    Serializer,
    Reader,
    Action,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generator => "generator",
            Role::Transformer => "transformer",
            Role::Serializer => "serializer",
            Role::Reader => "reader",
            Role::Action => "action",
        }
    }

    /// Name of the section grouping declarations of this role.
    pub fn section(&self) -> &'static str {
        match self {
            Role::Generator => "generators",
            Role::Transformer => "transformers",
            Role::Serializer => "serializers",
            Role::Reader => "readers",
            Role::Action => "actions",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common supertrait of every component.
pub trait Component: Send + Sync {
    /// Called when a pooled instance goes back to its pool.
    fn recycle(&mut self) {}
}

/// Ties a role trait object to its catalogue entry and registry table.
pub trait Stage: Component + 'static {
    const ROLE: Role;

    fn entry(class: &ClassEntry) -> Option<&ComponentClass<Self>>;

    fn wrap(class: ComponentClass<Self>) -> ClassEntry;

    fn table(registry: &ComponentRegistry) -> &RoleTable<Self>;

    fn table_mut(registry: &mut ComponentRegistry) -> &mut RoleTable<Self>;
}

macro_rules! stage_role {
    ($trait:ident, $variant:ident, $field:ident) => {
        impl Stage for dyn $trait {
            const ROLE: Role = Role::$variant;

            fn entry(class: &ClassEntry) -> Option<&ComponentClass<Self>> {
                match class {
                    ClassEntry::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn wrap(class: ComponentClass<Self>) -> ClassEntry {
                ClassEntry::$variant(class)
            }

            fn table(registry: &ComponentRegistry) -> &RoleTable<Self> {
                &registry.$field
            }

            fn table_mut(registry: &mut ComponentRegistry) -> &mut RoleTable<Self> {
                &mut registry.$field
            }
        }
    };
}

stage_role!(Generator, Generator, generators);
stage_role!(Transformer, Transformer, transformers);
stage_role!(Serializer, Serializer, serializers);
stage_role!(Reader, Reader, readers);
stage_role!(Action, Action, actions);
