//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build root processor → Start watcher → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C → broadcast → stop accepting, stop watcher → dispose root processor
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, dispose trees
//! - Trees with requests in flight defer their teardown to the last request

pub mod shutdown;

pub use shutdown::Shutdown;
