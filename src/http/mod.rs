//! HTTP edge of the sitemap processor.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request ID, trace, timeout layers)
//!     → request.rs (HTTP request → Environment)
//!     → spawn_blocking: TreeProcessor::process(env)
//!     → server.rs (Response / redirect / error → HTTP response)
//! ```
//!
//! # Design Decisions
//! - Tree processing is synchronous; the async edge hands it to the
//!   blocking pool so a slow pipeline never stalls the reactor

pub mod request;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
