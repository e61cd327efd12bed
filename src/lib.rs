//! Sitemap Processor Library
//!
//! A declarative request-processing engine: a sitemap document is compiled
//! into a tree of processing nodes that matches request URIs and assembles
//! generator → transformer → serializer pipelines from pooled components.

pub mod components;
pub mod config;
pub mod error;
pub mod http;
pub mod invoke;
pub mod lifecycle;
pub mod matching;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod sitemap;
pub mod source;
pub mod treeprocessor;
pub mod variables;

pub use config::schema::ServerConfig;
pub use error::{ConfigurationError, PatternError, ProcessingError, SitemapError};
pub use http::HttpServer;
pub use invoke::{Environment, InvokeContext};
pub use lifecycle::Shutdown;
pub use treeprocessor::{ProcessorSettings, TreeProcessor};
