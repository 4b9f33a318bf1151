//! Configuration management.
//!
//! Values come from an optional file and `TRANSFLOW__`-style environment
//! variables, e.g. `TRANSFLOW_QUEUE__MAX_CONCURRENT=8` or
//! `TRANSFLOW_CACHE__TTL_SECONDS=600`. A `.env` file in the working directory
//! is read first when present.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::{Result, TransflowError};
use crate::monitor::MonitorConfig;
use crate::queue::QueueConfig;
use crate::telemetry::{LoggingConfig, MetricsConfig};

const ENV_PREFIX: &str = "TRANSFLOW";
const ENV_SEPARATOR: &str = "__";

/// Main configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service name attached to logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "transflow".to_string()
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path. Environment variables still override
    /// file values.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every section for values the components would reject.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(TransflowError::configuration("service_name must not be empty"));
        }
        self.cache.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
