//! Declarative sitemap definitions.
//!
//! # Data Flow
//! ```text
//! sitemap.json (Source)
//!     → element.rs (parse into ConfigElement tree with locations)
//!     → treeprocessor::builder (compile into ProcessingNodes)
//! ```
//!
//! # Design Decisions
//! - The builder only sees the abstract element tree, never the file syntax
//! - Every element remembers where it came from for diagnostics

pub mod element;

pub use element::{ConfigElement, Location};
