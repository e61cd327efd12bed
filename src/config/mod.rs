//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → ProcessorSettings for the root TreeProcessor
//!
//! On sitemap change:
//!     watcher.rs detects change
//!     → TreeProcessor::refresh (on a blocking thread)
//!     → rebuild; on failure the previous tree keeps serving
//! ```
//!
//! # Design Decisions
//! - Server config is immutable once loaded; only sitemaps hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{ListenerConfig, ObservabilityConfig, ServerConfig, SitemapConfig};
pub use watcher::SitemapWatcher;
