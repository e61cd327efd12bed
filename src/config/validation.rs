//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool bounds, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// One semantic problem in a configuration file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    if config.sitemap.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("sitemap.path", "must not be empty"));
    }
    if config.sitemap.max_internal_depth == 0 {
        errors.push(ValidationError::new("sitemap.max_internal_depth", "must be > 0"));
    }

    if config.rebuild.backoff_base_ms == 0 {
        errors.push(ValidationError::new("rebuild.backoff_base_ms", "must be > 0"));
    }
    if config.rebuild.backoff_max_ms < config.rebuild.backoff_base_ms {
        errors.push(ValidationError::new(
            "rebuild.backoff_max_ms",
            "must be >= rebuild.backoff_base_ms",
        ));
    }

    if config.pool.max == 0 {
        errors.push(ValidationError::new("pool.max", "must be > 0"));
    }
    if config.pool.min > config.pool.max {
        errors.push(ValidationError::new("pool.min", "must be <= pool.max"));
    }
    if config.pool.acquire_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.acquire_timeout_ms", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
