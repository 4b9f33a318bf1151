#![allow(clippy::result_large_err)]
//! # Transflow Core
//!
//! Processing core for translation workloads.
//!
//! ## Architecture
//!
//! - **Task Queue**: Priority queue with bounded concurrency, retries and cancellation
//! - **Cache**: TTL key-value store with LRU eviction, compression and snapshots
//! - **Monitor**: Request, cache and per-task-type performance aggregates
//! - **Snapshots**: Sequenced JSON persistence shared by the cache and the queue
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **Config**: Environment and file based configuration

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod snapshot;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, TransflowError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{
        CacheConfig, CacheEntry, CacheKey, CacheObserver, CacheStats, CacheStore, KeyType,
    };
    pub use crate::config::Config;
    pub use crate::context::CoreContext;
    pub use crate::error::{ErrorCode, Result, TransflowError};
    pub use crate::monitor::{
        MonitorConfig, MonitorSnapshot, PerformanceMetrics, PerformanceMonitor, TaskMetrics,
    };
    pub use crate::queue::{
        handler_fn, HandlerError, HandlerResult, QueueConfig, QueueObserver, QueueStats,
        QueueTask, TaskContext, TaskHandler, TaskId, TaskQueue, TaskStatus, TaskType,
    };
}
