//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: `tracing-subscriber` with JSON, pretty or compact output
//! - **Metrics**: `metrics` facade backed by a Prometheus recorder
//!
//! # Example
//!
//! ```rust,no_run
//! use transflow_core::config::Config;
//! use transflow_core::telemetry::init_telemetry;
//!
//! let config = Config::load().expect("invalid configuration");
//! let telemetry = init_telemetry(&config).expect("Failed to initialize telemetry");
//! println!("{}", telemetry.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry};

use crate::config::Config;

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryHandle {
    /// Metrics handle for rendering the registry
    pub metrics: MetricsRegistry,
}

/// Initialize logging and metrics. Call once at startup.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &Config) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging)?;

    ::tracing::info!(service_name = %config.service_name, "Telemetry initialized");
    Ok(TelemetryHandle { metrics })
}
