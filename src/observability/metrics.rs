//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sitemap_requests_total` (counter): requests by outcome
//!   (`handled`, `not-found`, `redirect`, `error`)
//! - `sitemap_request_duration_seconds` (histogram): latency distribution
//! - `sitemap_rebuilds_total` (counter): tree builds by result (`ok`, `failed`)
//! - `sitemap_pool_exhausted_total` (counter): pool timeouts by component
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op, so library
//!   code and tests record freely

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`. Needs a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, outcome: &'static str, start: Instant) {
    metrics::counter!("sitemap_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("sitemap_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rebuild(source: &str, ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    metrics::counter!("sitemap_rebuilds_total", "source" => source.to_string(), "result" => result)
        .increment(1);
}

pub fn record_pool_exhausted(component: &str) {
    metrics::counter!("sitemap_pool_exhausted_total", "component" => component.to_string())
        .increment(1);
}
