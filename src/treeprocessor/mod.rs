//! Sitemap tree processing.
//!
//! # Data Flow
//! ```text
//! Request:
//!     TreeProcessor::process(env)
//!         → acquire_tree (lazy build / staleness check / rebuild)
//!         → TreeLease (tree can't be disposed while held)
//!         → Tree::invoke_root → pipelines → pipeline → match → ... → serialize
//!         → pipeline executed into env's response
//!
//! Mount:
//!     mount node → child TreeProcessor (cached per tree)
//!         → env prefix consumed for the scope of the call
//!         → child.process_in(env, same ctx)
//!
//! Build:
//!     source → ConfigElement → builder.rs → Tree + Disposer → ConcreteTree
//! ```
//!
//! # Design Decisions
//! - Nodes live in an arena addressed by `NodeId`; resource links are ids
//!   filled in by the link pass
//! - A replaced tree is retired, not disposed: teardown runs when the last
//!   request holding it finishes
//! - Teardown hooks run in reverse registration order, so mounted child
//!   processors go before the components they borrow

pub mod builder;
pub mod concrete;
pub mod disposer;
pub mod lifetime;
pub mod mount;
pub mod node;
pub mod processor;

pub use builder::{BuildContext, TreeBuilder};
pub use concrete::{ConcreteTree, TreeLease};
pub use disposer::Disposer;
pub use lifetime::Lifetime;
pub use mount::MountPoint;
pub use node::{Node, NodeId, NodeKind, Tree};
pub use processor::{ProcessorSettings, ProcessorState, TreeProcessor};
