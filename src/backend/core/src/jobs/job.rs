//! Job definitions and traits.
//!
//! This module provides the core abstractions for jobs the engine schedules:
//!
//! - **JobKey**: `(name, group)` identity of a job in the runtime
//! - **JobKind**: The closed set of job bodies the engine knows about
//! - **JobDefinition**: Key, kind, payload and optional retry bookkeeping
//! - **JobHandler**: The trait job bodies implement
//! - **JobContext**: Context passed to handlers during execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TollgateError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity of a job: unique `(name, group)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of job body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PublishExtension,
    DeleteExtension,
    MirrorExtension,
    MirrorMetadata,
    MirrorSitemap,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        Self::PublishExtension,
        Self::DeleteExtension,
        Self::MirrorExtension,
        Self::MirrorMetadata,
        Self::MirrorSitemap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublishExtension => "publish_extension",
            Self::DeleteExtension => "delete_extension",
            Self::MirrorExtension => "mirror_extension",
            Self::MirrorMetadata => "mirror_metadata",
            Self::MirrorSitemap => "mirror_sitemap",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TollgateError::unknown_job_kind(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry bookkeeping carried inside a job definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetadata {
    /// Retries already performed
    pub retries: u32,
    /// Retries allowed in total
    pub max_retries: u32,
}

impl RetryMetadata {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retries: 0,
            max_retries,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Metadata for the next attempt.
    pub fn next(&self) -> Self {
        Self {
            retries: self.retries + 1,
            max_retries: self.max_retries,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// A job as stored in the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub key: JobKey,
    pub kind: JobKind,
    /// Opaque payload handed to the handler
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Present when failures should be retried
    #[serde(default)]
    pub retry: Option<RetryMetadata>,
}

impl JobDefinition {
    pub fn new(key: JobKey, kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            key,
            kind,
            payload,
            retry: None,
        }
    }

    /// Allow up to `max_retries` retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = Some(RetryMetadata::new(max_retries));
        self
    }

    /// The same job with its retry counter advanced.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry = self.retry.map(|retry| retry.next());
        next
    }

    /// Keep the retries already spent by a previously stored version of this
    /// job, so re-admitting it never resets the counter.
    pub fn carry_retries_from(mut self, previous: &JobDefinition) -> Self {
        if let (Some(retry), Some(spent)) = (self.retry.as_mut(), previous.retry) {
            retry.retries = retry.retries.max(spent.retries);
        }
        self
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.retry.map_or(1, |retry| retry.retries + 1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether the failure looks transient. Reported in logs and outcomes;
    /// the retry budget alone decides whether the job runs again.
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
            context: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            context: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<TollgateError> for JobError {
    fn from(error: TollgateError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
            context: None,
        }
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

/// A finished execution, handed to completion listeners.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub definition: JobDefinition,
    /// `None` when the job succeeded
    pub error: Option<JobError>,
    pub duration: Duration,
}

impl JobOutcome {
    pub fn success(definition: JobDefinition, duration: Duration) -> Self {
        Self {
            definition,
            error: None,
            duration,
        }
    }

    pub fn failure(definition: JobDefinition, error: JobError, duration: Duration) -> Self {
        Self {
            definition,
            error: Some(error),
            duration,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn key(&self) -> &JobKey {
        &self.definition.key
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to handlers during execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The definition being executed
    pub definition: JobDefinition,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(definition: JobDefinition, cancellation: CancellationToken) -> Self {
        Self {
            definition,
            cancellation,
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.definition.key
    }

    pub fn kind(&self) -> JobKind {
        self.definition.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.definition.payload
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, JobError> {
        serde_json::from_value(self.definition.payload.clone())
            .map_err(|e| JobError::fatal(format!("invalid payload: {}", e)).with_code("PAYLOAD"))
    }

    /// Get the current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.definition.attempt()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run `future` unless the runtime shuts down first.
    pub async fn cancellable<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            result = future => Some(result),
            _ = self.cancellation.cancelled() => None,
        }
    }

    /// Log an info message associated with this job.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            job = %self.definition.key,
            kind = %self.definition.kind,
            attempt = self.attempt(),
            message
        );
    }

    /// Log a warning associated with this job.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            job = %self.definition.key,
            kind = %self.definition.kind,
            attempt = self.attempt(),
            message
        );
    }

    /// Log an error associated with this job.
    pub fn log_error(&self, message: &str) {
        tracing::error!(
            job = %self.definition.key,
            kind = %self.definition.kind,
            attempt = self.attempt(),
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// The trait every job body implements.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job.
    ///
    /// # Errors
    ///
    /// Return `JobError::retryable()` for transient failures and
    /// `JobError::fatal()` for permanent ones. Either way a job with retry
    /// budget left is resubmitted.
    async fn execute(&self, ctx: &JobContext) -> JobResult;

    /// Execution timeout; `None` uses the runtime default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carry_retries_keeps_spent_budget() {
        let key = JobKey::new("ext-1", "publish");
        let fresh = JobDefinition::new(key.clone(), JobKind::PublishExtension, serde_json::Value::Null)
            .with_max_retries(3);
        let spent = fresh.next_attempt().next_attempt();

        let carried = fresh.clone().carry_retries_from(&spent);
        assert_eq!(carried.retry.unwrap().retries, 2);
        assert_eq!(carried.retry.unwrap().max_retries, 3);

        // Never moves the counter backwards.
        let again = spent.clone().carry_retries_from(&fresh);
        assert_eq!(again.retry.unwrap().retries, 2);
    }

    #[test]
    fn test_job_key_display() {
        let key = JobKey::new("ext-42", "publish");
        assert_eq!(key.to_string(), "publish.ext-42");
    }

    #[test]
    fn test_job_kind_roundtrip() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(JobKind::from_str("compile_docs").is_err());
    }

    #[test]
    fn test_job_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&JobKind::MirrorMetadata).unwrap();
        assert_eq!(json, "\"mirror_metadata\"");
    }

    #[test]
    fn test_retry_metadata() {
        let retry = RetryMetadata::new(2);
        assert!(retry.can_retry());
        let retry = retry.next().next();
        assert_eq!(retry.retries, 2);
        assert!(!retry.can_retry());
    }

    #[test]
    fn test_next_attempt() {
        let definition = JobDefinition::new(
            JobKey::new("ext-1", "mirror"),
            JobKind::MirrorExtension,
            serde_json::json!({"namespace": "redhat"}),
        )
        .with_max_retries(3);

        assert_eq!(definition.attempt(), 1);
        let next = definition.next_attempt();
        assert_eq!(next.attempt(), 2);
        assert_eq!(next.retry, Some(RetryMetadata { retries: 1, max_retries: 3 }));
        assert_eq!(next.payload, definition.payload);
    }

    #[test]
    fn test_next_attempt_without_metadata() {
        let definition = JobDefinition::new(
            JobKey::new("sitemap", "mirror"),
            JobKind::MirrorSitemap,
            serde_json::Value::Null,
        );
        assert!(definition.next_attempt().retry.is_none());
    }

    #[test]
    fn test_job_error() {
        let error = JobError::retryable("network timeout")
            .with_code("TIMEOUT")
            .with_context(serde_json::json!({"attempt": 3}));

        assert!(error.retryable);
        assert_eq!(error.code, Some("TIMEOUT".to_string()));
        assert!(error.context.is_some());
        assert_eq!(error.to_string(), "network timeout (code: TIMEOUT)");
    }

    #[tokio::test]
    async fn test_context_cancellation() {
        let token = CancellationToken::new();
        let ctx = JobContext::new(
            JobDefinition::new(
                JobKey::new("ext-1", "publish"),
                JobKind::PublishExtension,
                serde_json::json!({"id": 7}),
            ),
            token.clone(),
        );

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancellable(std::future::pending::<()>()).await.is_none());

        #[derive(Deserialize)]
        struct Payload {
            id: u32,
        }
        assert_eq!(ctx.payload_as::<Payload>().unwrap().id, 7);
    }
}
