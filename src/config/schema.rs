//! Configuration schema definitions.
//!
//! This module defines the server configuration read by the binary.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::components::PoolSettings;
use crate::resilience::Backoff;
use crate::treeprocessor::ProcessorSettings;

/// Root configuration for the sitemap server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Root sitemap and reload behaviour.
    pub sitemap: SitemapConfig,

    /// Retry policy for failed rebuilds.
    pub rebuild: RebuildConfig,

    /// Default sizing of component pools.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Settings for the root processor (inherited by mounted sitemaps).
    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            check_reload: self.sitemap.check_reload,
            reload_check_delay: Duration::from_millis(self.sitemap.reload_check_delay_ms),
            rebuild_backoff: Backoff::new(
                Duration::from_millis(self.rebuild.backoff_base_ms),
                Duration::from_millis(self.rebuild.backoff_max_ms),
            ),
            pool: PoolSettings {
                min: self.pool.min,
                max: self.pool.max,
                acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            },
            max_internal_depth: self.sitemap.max_internal_depth,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for one request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Root sitemap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SitemapConfig {
    /// Path of the root sitemap document.
    pub path: PathBuf,

    /// Rebuild trees whose source changed.
    pub check_reload: bool,

    /// Minimum interval between two staleness checks, in milliseconds.
    pub reload_check_delay_ms: u64,

    /// Watch the root sitemap file and refresh as soon as it changes.
    pub watch: bool,

    /// Maximum nesting of internal (`cocoon:`) requests.
    pub max_internal_depth: usize,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sitemap.json"),
            check_reload: true,
            reload_check_delay_ms: 1_000,
            watch: true,
            max_internal_depth: 16,
        }
    }
}

/// Backoff between attempts after a failed rebuild.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Delay after the first failure, in milliseconds.
    pub backoff_base_ms: u64,

    /// Cap on the delay, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Pool sizing for poolable components without their own `pool-*` attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    /// How long a request waits for a free instance, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 32,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info" or "sitemap_processor=debug").
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.sitemap.path, PathBuf::from("sitemap.json"));
        assert!(config.sitemap.check_reload);
    }

    #[test]
    fn test_processor_settings_mapping() {
        let config: ServerConfig = toml::from_str(
            r#"
            [sitemap]
            check_reload = false
            reload_check_delay_ms = 250

            [pool]
            max = 4
            acquire_timeout_ms = 100
            "#,
        )
        .unwrap();
        let settings = config.processor_settings();
        assert!(!settings.check_reload);
        assert_eq!(settings.reload_check_delay, Duration::from_millis(250));
        assert_eq!(settings.pool.max, 4);
        assert_eq!(settings.pool.min, 1);
        assert_eq!(settings.pool.acquire_timeout, Duration::from_millis(100));
        assert_eq!(settings.rebuild_backoff, Backoff::default());
    }
}
