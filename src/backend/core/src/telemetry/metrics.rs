//! Prometheus metrics for the cache, the queue and snapshot persistence.
//!
//! Components emit through the `metrics` facade; nothing is recorded until a
//! recorder is installed with [`init_metrics`].

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address the scrape endpoint is expected on; informational
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for task durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
}

/// Handle on the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and describe every metric.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a global recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(
        service_name = %service_name,
        endpoint = %config.endpoint,
        "Metrics initialized"
    );

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Cache
    describe_counter!("transflow_cache_hits_total", "Cache reads that returned a value");
    describe_counter!(
        "transflow_cache_misses_total",
        "Cache reads that found nothing, by reason"
    );
    describe_counter!("transflow_cache_sets_total", "Cache inserts and overwrites");
    describe_counter!(
        "transflow_cache_evictions_total",
        "Entries evicted to respect capacity or memory limits"
    );
    describe_gauge!("transflow_cache_entries", "Entries currently stored");
    describe_gauge!(
        "transflow_cache_size_bytes",
        Unit::Bytes,
        "Total stored size of all entries"
    );

    // Queue
    describe_counter!(
        "transflow_queue_tasks_enqueued_total",
        "Tasks added to the queue"
    );
    describe_counter!(
        "transflow_queue_tasks_finished_total",
        "Tasks that reached COMPLETED or FAILED"
    );
    describe_counter!("transflow_queue_retries_total", "Failed attempts scheduled for retry");
    describe_gauge!("transflow_queue_pending", "Tasks waiting to run");
    describe_gauge!("transflow_queue_active", "Tasks currently running");
    describe_histogram!(
        "transflow_task_duration_seconds",
        Unit::Seconds,
        "Duration of the final attempt of each finished task"
    );

    // Monitor
    describe_counter!("transflow_monitor_requests_total", "Requests recorded by the monitor");
    describe_gauge!(
        "transflow_monitor_average_processing_ms",
        Unit::Milliseconds,
        "Mean request duration"
    );
    describe_gauge!("transflow_monitor_cache_hit_rate", "Cache hit rate seen by the monitor");
    describe_gauge!("transflow_monitor_queue_size", "Last reported queue size");
    describe_gauge!("transflow_monitor_active_tasks", "Last reported running tasks");

    // Persistence and errors
    describe_counter!(
        "transflow_snapshot_writes_total",
        "Snapshot file writes by outcome"
    );
    describe_counter!("transflow_errors_total", "Errors by code, category and severity");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "0.0.0.0:9090");
        assert!(!config.duration_buckets.is_empty());
        assert!(config.duration_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disabled_metrics() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config, "transflow-test").unwrap();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }
}
