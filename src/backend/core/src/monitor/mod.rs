//! Performance monitor.
//!
//! Aggregates request, cache and queue counters into one [`MonitorSnapshot`].
//! The monitor owns no timers: every recording call updates the aggregates
//! and writes the snapshot into the cache under `MonitorConfig::cache_key`.
//! It observes the cache and the queue through [`CacheObserver`] and
//! [`QueueObserver`].

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheObserver, CacheStore};
use crate::queue::{QueueObserver, TaskType};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Write snapshots into the cache
    #[serde(default = "default_enable_persistence")]
    pub enable_persistence: bool,

    #[serde(default = "default_cache_key")]
    pub cache_key: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enable_persistence: default_enable_persistence(),
            cache_key: default_cache_key(),
        }
    }
}

fn default_enable_persistence() -> bool {
    true
}

fn default_cache_key() -> String {
    "performance_metrics".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metrics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Last reported number of waiting tasks
    pub queue_size: u64,
    /// Last reported number of running tasks
    pub active_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub retry_count: u64,
    /// Sum of request durations in milliseconds
    pub total_processing_time: u64,
    /// `total_processing_time / total_requests`
    pub average_processing_time: f64,
    #[serde(with = "ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            cache_hits: 0,
            cache_misses: 0,
            queue_size: 0,
            active_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            retry_count: 0,
            total_processing_time: 0,
            average_processing_time: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl PerformanceMetrics {
    /// hits / (hits + misses), 0 before the first access.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Per task type aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub count: u64,
    /// Running mean in milliseconds
    pub average_processing_time: f64,
    /// Completed share of all finished tasks, not only this type's
    pub success_rate: f64,
    /// Failed share of all finished tasks, not only this type's
    pub failure_rate: f64,
}

/// Everything the monitor knows; the persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub metrics: PerformanceMetrics,
    pub task_metrics: BTreeMap<TaskType, TaskMetrics>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ═══════════════════════════════════════════════════════════════════════════════
// Performance Monitor
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregates performance counters.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorSnapshot>,
    cache: Option<Arc<CacheStore>>,
}

impl PerformanceMonitor {
    /// Create a monitor persisting into `cache`.
    ///
    /// With persistence enabled, a snapshot already stored under the cache key
    /// is picked up as the starting point.
    pub fn new(config: MonitorConfig, cache: Option<Arc<CacheStore>>) -> Arc<Self> {
        let restored = match (&cache, config.enable_persistence) {
            (Some(cache), true) => match cache.peek_typed::<MonitorSnapshot>(&config.cache_key) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    e.log();
                    None
                }
            },
            _ => None,
        };

        if restored.is_some() {
            info!(key = %config.cache_key, "Performance metrics restored from cache");
        }

        Arc::new(Self {
            config,
            state: Mutex::new(restored.unwrap_or_default()),
            cache,
        })
    }

    /// A monitor that keeps everything in memory.
    pub fn detached() -> Arc<Self> {
        Self::new(
            MonitorConfig {
                enable_persistence: false,
                ..Default::default()
            },
            None,
        )
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record one request. Failed requests count toward the average too.
    pub fn record_request(&self, success: bool, duration_ms: u64) {
        self.update(|snapshot| {
            let m = &mut snapshot.metrics;
            m.total_requests += 1;
            if success {
                m.successful_requests += 1;
            } else {
                m.failed_requests += 1;
            }
            m.total_processing_time += duration_ms;
            m.average_processing_time = m.total_processing_time as f64 / m.total_requests as f64;
        });

        let outcome = if success { "success" } else { "failure" };
        counter!("transflow_monitor_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn record_cache_access(&self, hit: bool) {
        self.update(|snapshot| {
            if hit {
                snapshot.metrics.cache_hits += 1;
            } else {
                snapshot.metrics.cache_misses += 1;
            }
        });
    }

    pub fn record_queue_metrics(&self, queue_size: usize, active_tasks: usize) {
        self.update(|snapshot| {
            snapshot.metrics.queue_size = queue_size as u64;
            snapshot.metrics.active_tasks = active_tasks as u64;
        });
    }

    /// Record a finished task.
    ///
    /// The type's success and failure rates are taken over the completed and
    /// failed totals of all types.
    pub fn record_task_completion(&self, task_type: TaskType, success: bool, duration_ms: u64) {
        self.update(|snapshot| {
            let m = &mut snapshot.metrics;
            if success {
                m.completed_tasks += 1;
            } else {
                m.failed_tasks += 1;
            }
            let finished = (m.completed_tasks + m.failed_tasks) as f64;
            let success_rate = round2(m.completed_tasks as f64 / finished);
            let failure_rate = round2(m.failed_tasks as f64 / finished);

            let tm = snapshot.task_metrics.entry(task_type).or_default();
            tm.count += 1;
            tm.average_processing_time = (tm.average_processing_time * (tm.count - 1) as f64
                + duration_ms as f64)
                / tm.count as f64;
            tm.success_rate = success_rate;
            tm.failure_rate = failure_rate;
        });
    }

    pub fn record_retry(&self) {
        self.update(|snapshot| snapshot.metrics.retry_count += 1);
    }

    /// Copy of the global counters.
    pub fn get_metrics(&self) -> PerformanceMetrics {
        self.state.lock().metrics.clone()
    }

    /// Copy of the per type aggregates.
    pub fn get_task_metrics(&self) -> BTreeMap<TaskType, TaskMetrics> {
        self.state.lock().task_metrics.clone()
    }

    pub fn task_metrics(&self, task_type: TaskType) -> Option<TaskMetrics> {
        self.state.lock().task_metrics.get(&task_type).cloned()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.state.lock().clone()
    }

    /// Zero every counter. The zeroed snapshot is in the cache on return.
    pub fn reset_metrics(&self) {
        self.update(|snapshot| *snapshot = MonitorSnapshot::default());
        info!("Performance metrics reset");
    }

    /// Write the current snapshot into the cache.
    pub fn flush(&self) {
        let state = self.state.lock();
        self.persist(&state);
    }

    fn update(&self, apply: impl FnOnce(&mut MonitorSnapshot)) {
        let mut state = self.state.lock();
        apply(&mut *state);
        state.metrics.last_updated = Utc::now();

        self.mirror(&state.metrics);
        // Persisting under the lock keeps cache writes in update order.
        self.persist(&state);
    }

    fn persist(&self, snapshot: &MonitorSnapshot) {
        if !self.config.enable_persistence {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };

        if let Err(e) = cache.set_pinned_typed(self.config.cache_key.as_str(), snapshot) {
            e.log();
        } else {
            debug!(key = %self.config.cache_key, "Performance snapshot stored");
        }
    }

    fn mirror(&self, metrics: &PerformanceMetrics) {
        gauge!("transflow_monitor_average_processing_ms").set(metrics.average_processing_time);
        gauge!("transflow_monitor_cache_hit_rate").set(metrics.cache_hit_rate());
        gauge!("transflow_monitor_queue_size").set(metrics.queue_size as f64);
        gauge!("transflow_monitor_active_tasks").set(metrics.active_tasks as f64);
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("persisting", &self.cache.is_some())
            .finish()
    }
}

impl CacheObserver for PerformanceMonitor {
    fn on_access(&self, hit: bool) {
        self.record_cache_access(hit);
    }
}

impl QueueObserver for PerformanceMonitor {
    fn on_queue_size(&self, pending: usize, active: usize) {
        self.record_queue_metrics(pending, active);
    }

    fn on_task_finished(&self, task_type: TaskType, success: bool, duration_ms: u64) {
        self.record_task_completion(task_type, success, duration_ms);
    }

    fn on_retry(&self, _task_type: TaskType) {
        self.record_retry();
    }
}
