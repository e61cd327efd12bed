//! Variable resolution for sitemap attributes.
//!
//! # Data Flow
//! ```text
//! Build time:
//!     "docs/{1}.{request-param:fmt}" → resolver.rs (parse once)
//!
//! Request time:
//!     VariableResolver::resolve(ctx, env)
//!         → map stack lookups ({1}, {../1}, {anchor/1})
//!         → modules.rs lookups ({request-param:x})
//! ```
//!
//! # Design Decisions
//! - Static strings skip resolution entirely
//! - Missing values resolve to "" unless the resolver is required

pub mod modules;
pub mod resolver;

pub use modules::InputModule;
pub use resolver::{Mode, VariableResolver};
