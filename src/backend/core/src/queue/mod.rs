//! Priority task queue with retries and bounded concurrency.
//!
//! Producers enqueue tasks with [`TaskQueue::add_task`]. A dispatch loop wakes
//! every `process_interval_ms`, picks the highest-priority pending tasks that
//! fit into the free concurrency slots and runs them concurrently on their
//! registered [`TaskHandler`]. Failed attempts are re-queued after
//! `retry_delay_ms` until `max_retries` is reached.
//!
//! # Usage
//!
//! ```rust,ignore
//! use transflow_core::queue::{handler_fn, QueueConfig, TaskQueue, TaskType};
//!
//! let queue = TaskQueue::new(QueueConfig::default()).await?;
//! queue.register_handler(
//!     TaskType::Translation,
//!     handler_fn(|ctx| async move { Ok(Some(ctx.payload)) }),
//! );
//!
//! let id = queue.add_task(TaskType::Translation, 5, json!({"segment": 1}));
//! let status = queue.get_task_status(id)?;
//! ```

pub mod handler;
pub mod task;

pub use handler::{handler_fn, HandlerError, HandlerResult, TaskContext, TaskHandler};
pub use task::{QueueTask, TaskId, TaskStatus, TaskType};

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::error::{ErrorCode, Result, TransflowError};
use crate::snapshot::SnapshotFile;

// ═══════════════════════════════════════════════════════════════════════════════
// Queue Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Failed attempts before a task ends FAILED
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Time budget handed to handlers in their context
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum tasks in PROCESSING at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Informational
    #[serde(default = "default_priority_levels")]
    pub priority_levels: u32,

    #[serde(default = "default_process_interval_ms")]
    pub process_interval_ms: u64,

    #[serde(default)]
    pub enable_persistence: bool,

    #[serde(default = "default_persistence_path")]
    pub persistence_path: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            priority_levels: default_priority_levels(),
            process_interval_ms: default_process_interval_ms(),
            enable_persistence: false,
            persistence_path: default_persistence_path(),
        }
    }
}

impl QueueConfig {
    /// Check the configuration for values the queue cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(TransflowError::new(
                ErrorCode::InvalidConfiguration,
                "queue.max_concurrent must be greater than zero",
            ));
        }
        if self.process_interval_ms == 0 {
            return Err(TransflowError::new(
                ErrorCode::InvalidConfiguration,
                "queue.process_interval_ms must be greater than zero",
            ));
        }
        if self.enable_persistence && self.persistence_path.trim().is_empty() {
            return Err(TransflowError::new(
                ErrorCode::InvalidConfiguration,
                "queue.persistence_path is required when persistence is enabled",
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_concurrent() -> usize {
    5
}

fn default_priority_levels() -> u32 {
    10
}

fn default_process_interval_ms() -> u64 {
    1000
}

fn default_persistence_path() -> String {
    "data/queue.json".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Observer and Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives queue events. Called without any queue lock held.
pub trait QueueObserver: Send + Sync {
    /// Tasks waiting (including those waiting out a retry delay) and running.
    fn on_queue_size(&self, pending: usize, active: usize);

    /// A task reached COMPLETED (`success`) or FAILED.
    fn on_task_finished(&self, task_type: TaskType, success: bool, duration_ms: u64);

    /// A failed attempt was scheduled for retry.
    fn on_retry(&self, task_type: TaskType);
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskId, QueueTask>,
    /// Dispatchable tasks in enqueue order
    pending: Vec<TaskId>,
    active: HashSet<TaskId>,
    /// PENDING tasks waiting out their retry delay
    retrying: HashSet<TaskId>,
}

impl QueueState {
    fn waiting(&self) -> usize {
        self.pending.len() + self.retrying.len()
    }

    /// Pick up to `slots` pending tasks, highest priority first, enqueue order
    /// among equals.
    fn select(&mut self, slots: usize) -> Vec<TaskId> {
        let mut ranked: Vec<(usize, i32)> = self
            .pending
            .iter()
            .enumerate()
            .map(|(pos, id)| (pos, self.tasks.get(id).map_or(i32::MIN, |t| t.priority)))
            .collect();
        // Stable: equal priorities keep enqueue order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut chosen: Vec<usize> = ranked.into_iter().take(slots).map(|(pos, _)| pos).collect();
        let selected: Vec<TaskId> = chosen.iter().map(|&pos| self.pending[pos]).collect();

        chosen.sort_unstable();
        for pos in chosen.into_iter().rev() {
            self.pending.remove(pos);
        }
        selected
    }
}

/// Resets the dispatch flag when a cycle ends.
struct DispatchGuard<'a>(&'a AtomicBool);

impl<'a> DispatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Outcome {
    Completed,
    Retry,
    Failed,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory task queue.
pub struct TaskQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    snapshot: Option<SnapshotFile>,
    observer: RwLock<Option<Weak<dyn QueueObserver>>>,
    dispatching: AtomicBool,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Handler invocations and retry timers
    workers: TaskTracker,
}

impl TaskQueue {
    /// Create a queue, restoring tasks from the snapshot file when persistence
    /// is enabled, and start the dispatch loop.
    ///
    /// The first dispatch happens one `process_interval_ms` after
    /// construction; register handlers before then.
    pub async fn new(config: QueueConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let snapshot = config
            .enable_persistence
            .then(|| SnapshotFile::new("queue", &config.persistence_path));

        let mut state = QueueState::default();
        if let Some(file) = &snapshot {
            if let Some(mut tasks) = file.load::<Vec<QueueTask>>().await {
                tasks.sort_by_key(|t| t.created_at);
                let mut requeued = 0usize;
                for mut task in tasks {
                    if !task.status.is_terminal() {
                        // Work interrupted mid-flight runs again.
                        task.set_status(TaskStatus::Pending);
                        state.pending.push(task.id);
                        requeued += 1;
                    }
                    state.tasks.insert(task.id, task);
                }
                info!(
                    tasks = state.tasks.len(),
                    requeued,
                    path = %file.path().display(),
                    "Queue restored from snapshot"
                );
            }
        }

        let queue = Arc::new(Self {
            config,
            state: Mutex::new(state),
            handlers: RwLock::new(HashMap::new()),
            snapshot,
            observer: RwLock::new(None),
            dispatching: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            workers: TaskTracker::new(),
        });

        let handle = spawn_dispatcher(
            Arc::downgrade(&queue),
            queue.cancel.clone(),
            queue.config.process_interval(),
        );
        *queue.dispatcher.lock() = Some(handle);

        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register the handler for a task type, replacing any previous one.
    pub fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(task_type, handler);
        debug!(task_type = %task_type, "Registered task handler");
    }

    pub fn has_handler(&self, task_type: TaskType) -> bool {
        self.handlers.read().contains_key(&task_type)
    }

    /// Attach an observer, replacing any previous one.
    pub fn attach_observer(&self, observer: Weak<dyn QueueObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Enqueue a task. Never waits for processing.
    #[instrument(skip(self, payload))]
    pub fn add_task(&self, task_type: TaskType, priority: i32, payload: serde_json::Value) -> TaskId {
        let task = QueueTask::new(task_type, priority, payload);
        let id = task.id;

        let (waiting, active) = {
            let mut state = self.state.lock();
            state.tasks.insert(id, task);
            state.pending.push(id);
            self.persist_locked(&state);
            (state.waiting(), state.active.len())
        };

        counter!("transflow_queue_tasks_enqueued_total", "task_type" => task_type.as_str())
            .increment(1);
        debug!(task_id = %id, "Task enqueued");
        self.report_size(waiting, active);
        id
    }

    /// Cancel a pending or processing task.
    ///
    /// A running handler is not interrupted; its outcome is discarded and the
    /// task stays CANCELLED.
    #[instrument(skip(self))]
    pub fn cancel_task(&self, id: TaskId) -> Result<()> {
        let (waiting, active, was_running) = {
            let mut state = self.state.lock();

            let queued = match state.pending.iter().position(|p| *p == id) {
                Some(pos) => {
                    state.pending.remove(pos);
                    true
                }
                None => false,
            };
            let retrying = state.retrying.remove(&id);
            let running = state.active.remove(&id);

            if !(queued || retrying || running) {
                return Err(TransflowError::task_not_found(id));
            }

            match state.tasks.get_mut(&id) {
                Some(task) => task.cancel(),
                None => return Err(TransflowError::task_not_found(id)),
            }
            self.persist_locked(&state);
            (state.waiting(), state.active.len(), running)
        };

        info!(was_running, "Task cancelled");
        self.report_size(waiting, active);
        Ok(())
    }

    pub fn get_task_status(&self, id: TaskId) -> Result<TaskStatus> {
        self.state
            .lock()
            .tasks
            .get(&id)
            .map(|task| task.status)
            .ok_or_else(|| TransflowError::task_not_found(id))
    }

    /// Copy of a task record.
    pub fn get_task(&self, id: TaskId) -> Result<QueueTask> {
        self.state
            .lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| TransflowError::task_not_found(id))
    }

    /// Tasks in `status`, oldest first.
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<QueueTask> {
        let mut tasks: Vec<QueueTask> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats {
            total: state.tasks.len(),
            ..Default::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drop terminal tasks that finished more than `older_than` ago.
    /// Returns the number removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let age = chrono::Duration::milliseconds(i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX));
        let cutoff = chrono::Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let mut state = self.state.lock();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, task| task.finished_at().map_or(true, |at| at > cutoff));
        let removed = before - state.tasks.len();

        if removed > 0 {
            self.persist_locked(&state);
            debug!(removed, "Pruned finished tasks");
        }
        removed
    }

    /// Run one dispatch cycle now. Returns the number of tasks started, or 0
    /// when another cycle is already running.
    #[instrument(skip(self))]
    pub fn process_pending(self: &Arc<Self>) -> usize {
        let Some(_guard) = DispatchGuard::acquire(&self.dispatching) else {
            debug!("Dispatch cycle already running, skipping");
            return 0;
        };

        let (batch, waiting, active) = {
            let mut state = self.state.lock();
            let slots = self.config.max_concurrent.saturating_sub(state.active.len());
            if slots == 0 || state.pending.is_empty() {
                return 0;
            }

            let mut batch = Vec::new();
            for id in state.select(slots) {
                let Some(task) = state.tasks.get_mut(&id) else {
                    continue;
                };
                task.start();
                batch.push(TaskContext {
                    task_id: id,
                    task_type: task.task_type,
                    priority: task.priority,
                    payload: task.payload.clone(),
                    attempt: task.retry_count + 1,
                    timeout: self.config.timeout(),
                });
                state.active.insert(id);
            }
            self.persist_locked(&state);
            (batch, state.waiting(), state.active.len())
        };

        self.report_size(waiting, active);

        let started = batch.len();
        for ctx in batch {
            let handler = self.handlers.read().get(&ctx.task_type).cloned();
            let queue = Arc::clone(self);
            self.workers.spawn(async move {
                queue.run_task(ctx, handler).await;
            });
        }

        debug!(started, "Dispatched tasks");
        started
    }

    /// Stop the dispatch loop and write a final snapshot.
    ///
    /// Handlers already running are not awaited.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue dispatcher ended abnormally");
            }
        }

        if let Some(file) = &self.snapshot {
            let encoded = {
                let state = self.state.lock();
                let sequence = file.next_sequence();
                SnapshotFile::encode(&snapshot_view(&state)).map(|data| (sequence, data))
            };

            match encoded {
                Ok((sequence, data)) => file.write(sequence, data).await,
                Err(e) => e.log(),
            }
            file.flush().await;
        }

        let stats = self.stats();
        info!(
            pending = stats.pending,
            processing = stats.processing,
            "Task queue shut down"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_task(self: Arc<Self>, ctx: TaskContext, handler: Option<Arc<dyn TaskHandler>>) {
        let started = Instant::now();

        let outcome = match handler {
            Some(handler) => AssertUnwindSafe(handler.handle(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::new("Task handler panicked").with_code("PANIC"))),
            None => {
                let error = TransflowError::handler_not_registered(ctx.task_type);
                Err(HandlerError::new(error.user_message())
                    .with_code(ErrorCode::HandlerNotRegistered.to_string()))
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.complete(&ctx, outcome, duration_ms);
    }

    fn complete(self: &Arc<Self>, ctx: &TaskContext, outcome: HandlerResult, duration_ms: u64) {
        let id = ctx.task_id;

        let (result, waiting, active) = {
            let mut state = self.state.lock();
            let was_active = state.active.remove(&id);
            let max_retries = self.config.max_retries;

            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if !was_active || task.status != TaskStatus::Processing {
                debug!(task_id = %id, status = %task.status, "Discarding outcome of cancelled task");
                return;
            }

            let result = match outcome {
                Ok(value) => {
                    task.result = value;
                    task.error = None;
                    task.finish(TaskStatus::Completed, duration_ms);
                    Outcome::Completed
                }
                Err(e) => {
                    let error = TransflowError::handler_failed(id, e.to_string());
                    task.error = Some(error.user_message().to_string());

                    // retry_count counts failed attempts, so a task that
                    // fails max_retries times ends FAILED.
                    task.retry_count += 1;
                    if !e.fatal && task.retry_count < max_retries {
                        task.set_status(TaskStatus::Pending);
                        debug!(task_id = %id, retry_count = task.retry_count, error = %e, "Task attempt failed, will retry");
                        Outcome::Retry
                    } else {
                        task.finish(TaskStatus::Failed, duration_ms);
                        error.log();
                        Outcome::Failed
                    }
                }
            };

            if matches!(result, Outcome::Retry) {
                state.retrying.insert(id);
            }
            self.persist_locked(&state);
            (result, state.waiting(), state.active.len())
        };

        let task_type = ctx.task_type;
        match result {
            Outcome::Completed => {
                self.record_finished(task_type, true, duration_ms);
                debug!(task_id = %id, duration_ms, "Task completed");
            }
            Outcome::Failed => {
                self.record_finished(task_type, false, duration_ms);
            }
            Outcome::Retry => {
                counter!("transflow_queue_retries_total", "task_type" => task_type.as_str())
                    .increment(1);
                if let Some(observer) = self.observer() {
                    observer.on_retry(task_type);
                }
                self.schedule_retry(id);
            }
        }
        self.report_size(waiting, active);
    }

    fn schedule_retry(self: &Arc<Self>, id: TaskId) {
        let queue = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let delay = self.config.retry_delay();

        self.workers.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(queue) = queue.upgrade() {
                        queue.requeue(id);
                    }
                }
            }
        });
    }

    fn requeue(&self, id: TaskId) {
        let (waiting, active) = {
            let mut state = self.state.lock();
            if !state.retrying.remove(&id) {
                return;
            }
            let still_pending = state
                .tasks
                .get(&id)
                .is_some_and(|task| task.status == TaskStatus::Pending);
            if !still_pending {
                return;
            }
            state.pending.push(id);
            self.persist_locked(&state);
            (state.waiting(), state.active.len())
        };

        debug!(task_id = %id, "Task re-queued after retry delay");
        self.report_size(waiting, active);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Schedule a snapshot. Must be called with the state lock held.
    fn persist_locked(&self, state: &QueueState) {
        let Some(file) = &self.snapshot else {
            return;
        };

        let sequence = file.next_sequence();
        match SnapshotFile::encode(&snapshot_view(state)) {
            Ok(data) => file.schedule(sequence, data),
            Err(e) => e.log(),
        }
    }

    fn observer(&self) -> Option<Arc<dyn QueueObserver>> {
        self.observer.read().as_ref().and_then(Weak::upgrade)
    }

    fn report_size(&self, waiting: usize, active: usize) {
        gauge!("transflow_queue_pending").set(waiting as f64);
        gauge!("transflow_queue_active").set(active as f64);
        if let Some(observer) = self.observer() {
            observer.on_queue_size(waiting, active);
        }
    }

    fn record_finished(&self, task_type: TaskType, success: bool, duration_ms: u64) {
        let outcome = if success { "completed" } else { "failed" };
        counter!(
            "transflow_queue_tasks_finished_total",
            "task_type" => task_type.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("transflow_task_duration_seconds", "task_type" => task_type.as_str())
            .record(duration_ms as f64 / 1000.0);

        if let Some(observer) = self.observer() {
            observer.on_task_finished(task_type, success, duration_ms);
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot layout: the task array, oldest first.
fn snapshot_view(state: &QueueState) -> Vec<&QueueTask> {
    let mut tasks: Vec<&QueueTask> = state.tasks.values().collect();
    tasks.sort_by_key(|task| task.created_at);
    tasks
}

fn spawn_dispatcher(
    queue: Weak<TaskQueue>,
    cancel: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(queue) = queue.upgrade() else { break };
                    queue.process_pending();
                }
            }
        }
        debug!("Queue dispatcher stopped");
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
