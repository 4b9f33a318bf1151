//! Error handling for Transflow Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable code, a user-safe message
//!   and an optional internal message for logs
//! - Status code mapping for the HTTP layer that surfaces task state
//! - Severity-aware logging through `tracing`
//! - Error counters through the `metrics` facade
//!
//! # Usage
//!
//! ```rust,ignore
//! use transflow_core::error::{ErrorContext, ErrorCode, Result};
//!
//! fn load(path: &Path) -> Result<Vec<u8>> {
//!     std::fs::read(path).with_error_code(ErrorCode::PersistenceFailed)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Transflow operations.
pub type Result<T> = std::result::Result<T, TransflowError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Queue Errors (1000-1099)
    TaskNotFound,
    HandlerFailed,
    HandlerNotRegistered,

    // Storage Errors (2000-2099)
    PersistenceFailed,
    SerializationError,
    DeserializationError,
    CompressionFailed,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::TaskNotFound => 1000,
            Self::HandlerFailed => 1001,
            Self::HandlerNotRegistered => 1002,

            Self::PersistenceFailed => 2000,
            Self::SerializationError => 2001,
            Self::DeserializationError => 2002,
            Self::CompressionFailed => 2003,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code the web layer should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::TaskNotFound => 404,
            Self::HandlerNotRegistered => 422,
            Self::HandlerFailed => 502,
            Self::PersistenceFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::CompressionFailed
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError => 500,
        }
    }

    /// Whether an operation failing with this code may succeed if repeated.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HandlerFailed | Self::PersistenceFailed)
    }

    /// Get the error category for grouping in logs and metrics.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::TaskNotFound | Self::HandlerFailed | Self::HandlerNotRegistered => "queue",
            Self::PersistenceFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::CompressionFailed => "storage",
            Self::ConfigurationError | Self::InvalidConfiguration => "configuration",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level used to pick the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected misuse, e.g. an unknown task id
    Low,
    /// Recoverable failures such as a throwing handler
    Medium,
    /// Degraded operation, e.g. snapshot writes failing
    High,
    /// Component cannot operate
    Critical,
}

impl ErrorSeverity {
    /// Determine severity from an error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::TaskNotFound => Self::Low,
            ErrorCode::HandlerFailed | ErrorCode::HandlerNotRegistered => Self::Medium,
            ErrorCode::PersistenceFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::CompressionFailed => Self::High,
            ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured details attached to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Type of the entity involved (e.g. "task", "snapshot")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Identifier of the entity involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Free-form context
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Transflow Core.
#[derive(Error, Debug)]
pub struct TransflowError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TransflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TransflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Unknown task id, or a task that is no longer pending or processing.
    pub fn task_not_found(task_id: impl fmt::Display) -> Self {
        let id = task_id.to_string();
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("task", id))
    }

    /// A task handler failed.
    pub fn handler_failed(task_id: impl fmt::Display, message: impl Into<String>) -> Self {
        let id = task_id.to_string();
        let message = message.into();
        Self::new(ErrorCode::HandlerFailed, format!("Task {} failed: {}", id, message))
            .with_details(ErrorDetails::new().with_entity("task", id))
    }

    /// No handler is registered for a task type.
    pub fn handler_not_registered(task_type: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::HandlerNotRegistered,
            format!("No handler registered for task type: {}", task_type),
        )
    }

    /// Snapshot I/O failed.
    pub fn persistence(path: impl fmt::Display, message: impl Into<String>) -> Self {
        let path = path.to_string();
        Self::with_internal(
            ErrorCode::PersistenceFailed,
            "Failed to persist snapshot",
            message,
        )
        .with_details(ErrorDetails::new().with_entity("snapshot", path))
    }

    /// Invalid configuration value.
    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_internal(
            ErrorCode::InvalidConfiguration,
            "Invalid configuration",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "Operation failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Operation failed"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Operation rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "transflow_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| TransflowError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| TransflowError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TransflowError::new(ErrorCode::TaskNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| TransflowError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for TransflowError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for TransflowError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(
            ErrorCode::PersistenceFailed,
            "An I/O error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::task::JoinError> for TransflowError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "Background task failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for TransflowError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<TransflowError>() {
            Ok(inner) => inner,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for TransflowError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_)
            | config::ConfigError::PathParse(_)
            | config::ConfigError::FileParse { .. }
            | config::ConfigError::Type { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
