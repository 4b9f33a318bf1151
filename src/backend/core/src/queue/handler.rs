//! Task handlers.
//!
//! Each [`TaskType`] is served by one [`TaskHandler`]. The queue calls the
//! handler with a [`TaskContext`] and records the outcome on the task: a value
//! becomes the task's `result`, an error becomes its `error` and, unless the
//! error is fatal, schedules a retry.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::task::{TaskId, TaskType};
use crate::error::TransflowError;

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub message: String,
    /// Skip any remaining retries
    pub fatal: bool,
    pub code: Option<String>,
}

impl HandlerError {
    /// A failure worth retrying.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
            code: None,
        }
    }

    /// A permanent failure; the task fails without further attempts.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for HandlerError {}

impl From<TransflowError> for HandlerError {
    fn from(error: TransflowError) -> Self {
        Self {
            message: error.user_message().to_string(),
            fatal: !error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }
}

/// A payload that does not decode will not decode on retry either.
impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::fatal(format!("Invalid task payload: {}", error)).with_code("INVALID_PAYLOAD")
    }
}

/// Result of one handler invocation.
pub type HandlerResult = std::result::Result<Option<serde_json::Value>, HandlerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Task Context
// ═══════════════════════════════════════════════════════════════════════════════

/// What a handler gets to see of the task it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: i32,
    pub payload: serde_json::Value,
    /// 1 on the first run, incremented by each retry
    pub attempt: u32,
    /// Configured per-task time budget; enforced only through
    /// [`TaskContext::with_timeout`]
    pub timeout: Duration,
}

impl TaskContext {
    /// Decode the payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Run `future` within the task's time budget.
    pub async fn with_timeout<F, T>(&self, future: F) -> Result<T, HandlerError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, future).await.map_err(|_| {
            HandlerError::new(format!("Timed out after {}ms", self.timeout.as_millis()))
                .with_code("TIMEOUT")
        })
    }

    /// Log a message associated with this task.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            task_id = %self.task_id,
            task_type = %self.task_type,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this task.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            task_id = %self.task_id,
            task_type = %self.task_type,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Performs the work for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one attempt of a task.
    ///
    /// # Errors
    ///
    /// Return [`HandlerError::new`] for transient failures that should be
    /// retried and [`HandlerError::fatal`] for permanent ones.
    async fn handle(&self, ctx: &TaskContext) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, ctx: &TaskContext) -> HandlerResult {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap an async closure as a handler.
///
/// ```rust,ignore
/// queue.register_handler(
///     TaskType::Translation,
///     handler_fn(|ctx| async move {
///         let request: TranslateRequest = ctx.payload_as()?;
///         Ok(Some(json!({ "text": translate(&request).await? })))
///     }),
/// );
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde::Deserialize;
    use serde_json::json;

    fn context(payload: serde_json::Value) -> TaskContext {
        TaskContext {
            task_id: TaskId::new(),
            task_type: TaskType::Translation,
            priority: 0,
            payload,
            attempt: 1,
            timeout: Duration::from_millis(50),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Segment {
        text: String,
    }

    #[test]
    fn test_payload_decoding() {
        let ctx = context(json!({"text": "hola"}));
        let segment: Segment = ctx.payload_as().unwrap();
        assert_eq!(segment.text, "hola");

        let err = context(json!(42)).payload_as::<Segment>().unwrap_err();
        assert!(err.fatal);
        assert_eq!(err.code.as_deref(), Some("INVALID_PAYLOAD"));
    }

    #[test]
    fn test_error_conversion() {
        let retryable: HandlerError = TransflowError::handler_failed("t-1", "rate limited").into();
        assert!(!retryable.fatal);

        let fatal: HandlerError = TransflowError::internal("bug").into();
        assert!(fatal.fatal);
        assert_eq!(fatal.code, Some(ErrorCode::InternalError.to_string()));

        let display = HandlerError::new("boom").with_code("E42").to_string();
        assert_eq!(display, "boom (code: E42)");
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|ctx: TaskContext| async move {
            Ok(Some(json!({ "attempt": ctx.attempt })))
        });

        let result = handler.handle(&context(json!(null))).await.unwrap();
        assert_eq!(result, Some(json!({ "attempt": 1 })));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ctx = context(json!(null));

        let fast = ctx.with_timeout(async { 7 }).await.unwrap();
        assert_eq!(fast, 7);

        let slow = ctx
            .with_timeout(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(slow.code.as_deref(), Some("TIMEOUT"));
        assert!(!slow.fatal);
    }
}
