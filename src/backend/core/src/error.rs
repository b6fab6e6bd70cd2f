//! Error handling for Tollgate.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable [`ErrorCode`]
//! - The engine's error taxonomy ([`ErrorClass`]) used to decide where an
//!   error is caught, logged, or surfaced
//! - User-facing vs internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use tollgate_core::error::{ErrorCode, ErrorContext, Result};
//!
//! fn load_payload(raw: &str) -> Result<serde_json::Value> {
//!     serde_json::from_str(raw).with_error_code(ErrorCode::DeserializationError)
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

/// A specialized Result type for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// Codes are stable; the numeric ranges group them by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job Errors (1000-1099)
    JobNotFound,
    JobAlreadyExists,
    InvalidStateTransition,
    JobExecutionFailed,
    JobTimeout,

    // Recurring Job Errors (1100-1199)
    BindingNotFound,

    // Store Errors (2000-2099)
    StoreError,
    StoreConnectionFailed,
    StoreQueryFailed,
    StoreTransactionFailed,
    RecordNotFound,
    DuplicateRecord,
    MigrationFailed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Runtime Errors (3000-3099)
    RuntimeShutdown,
    WorkerPoolExhausted,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,
    UnknownJobKind,
    InvalidCronExpression,
    HandlerNotRegistered,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::JobNotFound => 1000,
            Self::JobAlreadyExists => 1001,
            Self::InvalidStateTransition => 1002,
            Self::JobExecutionFailed => 1003,
            Self::JobTimeout => 1004,

            Self::BindingNotFound => 1100,

            Self::StoreError => 2000,
            Self::StoreConnectionFailed => 2001,
            Self::StoreQueryFailed => 2002,
            Self::StoreTransactionFailed => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,
            Self::MigrationFailed => 2006,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::RuntimeShutdown => 3000,
            Self::WorkerPoolExhausted => 3001,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,
            Self::UnknownJobKind => 5003,
            Self::InvalidCronExpression => 5004,
            Self::HandlerNotRegistered => 5005,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Check if an operation failing with this code may succeed when retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreError
                | Self::StoreConnectionFailed
                | Self::StoreQueryFailed
                | Self::StoreTransactionFailed
                | Self::JobExecutionFailed
                | Self::JobTimeout
                | Self::WorkerPoolExhausted
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "recurring",
            2000..=2099 => "store",
            2200..=2299 => "serialization",
            3000..=3099 => "runtime",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Get the taxonomy class for this code.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::StoreError
            | Self::StoreConnectionFailed
            | Self::StoreQueryFailed
            | Self::StoreTransactionFailed
            | Self::RecordNotFound
            | Self::DuplicateRecord
            | Self::MigrationFailed => ErrorClass::TransientStore,

            Self::JobExecutionFailed | Self::JobTimeout => ErrorClass::JobExecution,

            Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::UnknownJobKind
            | Self::InvalidCronExpression
            | Self::HandlerNotRegistered => ErrorClass::Configuration,

            Self::JobNotFound
            | Self::JobAlreadyExists
            | Self::InvalidStateTransition
            | Self::BindingNotFound
            | Self::RuntimeShutdown
            | Self::WorkerPoolExhausted => ErrorClass::Runtime,

            Self::SerializationError
            | Self::DeserializationError
            | Self::InvalidJson
            | Self::InternalError
            | Self::UnknownError => ErrorClass::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Class
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an error belongs in the engine's propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Durable store I/O failure. Caught at the dispatch pass boundary and
    /// retried on the next trigger.
    TransientStore,
    /// A job body failed. Routed to the retry coordinator.
    JobExecution,
    /// Bad configuration. Fails fast at install or submit time.
    Configuration,
    /// The execution runtime rejected an operation (missing job, shut down).
    Runtime,
    /// Bugs and serialization failures.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientStore => "transient_store",
            Self::JobExecution => "job_execution",
            Self::Configuration => "configuration",
            Self::Runtime => "runtime",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected conditions (missing records, duplicate submissions)
    Low,
    /// Operational issues (timeouts, job failures)
    Medium,
    /// System errors (store failures, bad configuration)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound
            | ErrorCode::JobAlreadyExists
            | ErrorCode::BindingNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateRecord
            | ErrorCode::InvalidStateTransition => Self::Low,

            ErrorCode::JobExecutionFailed
            | ErrorCode::JobTimeout
            | ErrorCode::WorkerPoolExhausted
            | ErrorCode::RuntimeShutdown => Self::Medium,

            ErrorCode::StoreError
            | ErrorCode::StoreQueryFailed
            | ErrorCode::StoreTransactionFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::UnknownJobKind
            | ErrorCode::InvalidCronExpression
            | ErrorCode::HandlerNotRegistered => Self::High,

            ErrorCode::StoreConnectionFailed
            | ErrorCode::MigrationFailed
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job key, binding name, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
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

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Tollgate.
///
/// Every error carries a stable code, a short message that is safe to show
/// operators, an optional internal message for logs, and the source error.
#[derive(Error, Debug)]
pub struct TollgateError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Short, operator-facing message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TollgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl TollgateError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
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

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::StoreError, "A durable store error occurred", message)
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

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the operator-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Get the taxonomy class.
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let class = self.class();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    class = %class,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    class = %class,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    class = %class,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    class = %class,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "tollgate_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
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
        self.map_err(|e| TollgateError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| TollgateError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TollgateError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| TollgateError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for TollgateError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("key") || constraint.contains("unique") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::StoreQueryFailed, "A durable store query failed")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::StoreConnectionFailed,
                "Unable to connect to the durable store",
            ),
            sqlx::Error::Migrate(_) => (
                ErrorCode::MigrationFailed,
                "Durable store migrations failed",
            ),
            _ => (ErrorCode::StoreError, "A durable store error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for TollgateError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::MigrationFailed,
            "Durable store migrations failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<cron::error::Error> for TollgateError {
    fn from(error: cron::error::Error) -> Self {
        Self::with_internal(
            ErrorCode::InvalidCronExpression,
            "Cron expression could not be parsed",
            error.to_string(),
        )
    }
}

impl From<tokio::sync::AcquireError> for TollgateError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::with_internal(
            ErrorCode::RuntimeShutdown,
            "Worker pool is closed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for TollgateError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::JobTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for TollgateError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::MissingConfiguration, "File not found"),
            ErrorKind::TimedOut => (ErrorCode::StoreConnectionFailed, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::StoreConnectionFailed, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for TollgateError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<TollgateError>() {
            Ok(tollgate_error) => tollgate_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for TollgateError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl TollgateError {
    // ─────────────────────────────────────────────────────────────────────────
    // Job Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// The runtime has no stored definition for a job key.
    pub fn job_not_found(job: impl fmt::Display) -> Self {
        let key = job.to_string();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", key))
            .with_details(ErrorDetails::new().with_entity("job", key))
    }

    /// A job definition already exists and replacement was not requested.
    pub fn job_already_exists(job: impl fmt::Display) -> Self {
        let key = job.to_string();
        Self::new(ErrorCode::JobAlreadyExists, format!("Job already exists: {}", key))
            .with_details(ErrorDetails::new().with_entity("job", key))
    }

    /// A record was not in the state an operation requires.
    pub fn invalid_state_transition(
        entity: impl Into<String>,
        from: impl fmt::Debug,
        to: impl fmt::Debug,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid {} state transition: {:?} -> {:?}", entity.into(), from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }

    /// A job body exceeded its execution timeout.
    pub fn job_timeout(job: impl fmt::Display, timeout_secs: u64) -> Self {
        let key = job.to_string();
        Self::new(
            ErrorCode::JobTimeout,
            format!("Job {} exceeded {}s timeout", key, timeout_secs),
        )
        .with_context("timeout_secs", timeout_secs)
        .with_details(ErrorDetails::new().with_entity("job", key))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// A job kind name is not part of the kind registry.
    pub fn unknown_job_kind(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::new(ErrorCode::UnknownJobKind, format!("Unknown job kind: {}", kind))
            .with_details(
                ErrorDetails::new()
                    .with_entity("job_kind", &kind)
                    .with_suggestion("Register the kind in JobKind before configuring it"),
            )
    }

    /// A cron expression is malformed.
    pub fn invalid_cron(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        let expression = expression.into();
        Self::with_internal(
            ErrorCode::InvalidCronExpression,
            format!("Invalid cron expression: {}", expression),
            reason,
        )
        .with_context("expression", expression)
    }

    /// No handler was registered for a job kind.
    pub fn handler_not_registered(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::new(
            ErrorCode::HandlerNotRegistered,
            format!("No handler registered for job kind: {}", kind),
        )
        .with_details(ErrorDetails::new().with_entity("job_kind", kind))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
