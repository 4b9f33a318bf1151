//! Component wiring.
//!
//! [`CoreContext`] builds the cache, the performance monitor and the task
//! queue from one [`Config`] and connects them: the monitor persists into the
//! cache and observes both the cache and the queue.

use std::sync::{Arc, Weak};
use tracing::info;

use crate::cache::{CacheObserver, CacheStore};
use crate::config::Config;
use crate::error::Result;
use crate::monitor::PerformanceMonitor;
use crate::queue::{QueueObserver, TaskQueue};

/// The running components.
#[derive(Debug, Clone)]
pub struct CoreContext {
    pub cache: Arc<CacheStore>,
    pub monitor: Arc<PerformanceMonitor>,
    pub queue: Arc<TaskQueue>,
}

impl CoreContext {
    /// Build and connect all components.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let cache = CacheStore::new(config.cache.clone()).await?;
        let monitor = PerformanceMonitor::new(config.monitor.clone(), Some(cache.clone()));

        let cache_observer: Weak<dyn CacheObserver> = Arc::downgrade(&monitor) as Weak<dyn CacheObserver>;
        cache.attach_observer(cache_observer);

        let queue = TaskQueue::new(config.queue.clone()).await?;
        let queue_observer: Weak<dyn QueueObserver> = Arc::downgrade(&monitor) as Weak<dyn QueueObserver>;
        queue.attach_observer(queue_observer);

        info!(service_name = %config.service_name, "Core components started");

        Ok(Self {
            cache,
            monitor,
            queue,
        })
    }

    /// Stop the queue, write the final monitor snapshot, then stop the cache.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.monitor.flush();
        self.cache.shutdown().await;
        info!("Core components stopped");
    }
}
