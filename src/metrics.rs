//! Prometheus exporter setup.
//!
//! The counters recorded across the crate are listed in [`COUNTERS`].

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Counters recorded by the proxy, with their help text.
pub const COUNTERS: [(&str, &str); 5] = [
    ("apiproxy_queries_total", "Queries dispatched, labelled by service"),
    ("apiproxy_cache_hits_total", "Upstream requests answered from the response cache"),
    ("apiproxy_cache_misses_total", "Upstream requests sent to the provider"),
    ("apiproxy_upstream_errors_total", "Upstream transport failures, labelled by service"),
    ("apiproxy_connections_total", "Accepted socket connections"),
];

/// Install the Prometheus recorder for the proxy counters when
/// `config.enabled` is set.
///
/// The exporter serves `/metrics` on `config.listen` and every entry of
/// [`COUNTERS`] gets its help text. Without a recorder, counter updates are
/// no-ops.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| Error::Metrics(format!("exporter on {}: {err}", config.listen)))?;

    for (name, help) in COUNTERS {
        metrics::describe_counter!(name, help);
    }
    Ok(())
}
