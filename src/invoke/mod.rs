//! Per-request state.
//!
//! # Data Flow
//! ```text
//! http edge / internal redirect
//!     → environment.rs (request URI, prefix, parameters, response sink)
//!     → context.rs (parameter-map stack, pipeline under construction)
//!     → node invocation reads and pushes maps
//!     → context dropped → pooled components released
//! ```
//!
//! # Design Decisions
//! - Nothing here is shared between requests or threads
//! - Map push/pop is tied to a guard so scopes always unwind
//! - Internal redirects get a fresh context but share the response

pub mod context;
pub mod environment;
pub mod redirect;

use std::collections::HashMap;

/// Named values pushed by matchers, selectors, actions and calls.
pub type ParameterMap = HashMap<String, String>;

pub use context::{InvokeContext, MapScope};
pub use environment::{Environment, EnvironmentScope, Response};
pub use redirect::{Redirect, Redirector};
