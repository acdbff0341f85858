//! Error and retry-policy types for the course generation domain.
//!
//! [`StageError`] covers everything that can go wrong while running one stage
//! attempt; the executor turns it into a retry decision. [`PipelineError`] is
//! what callers of the public executor operations see. Port-level errors
//! ([`LlmError`], [`StoreError`]) are produced by infrastructure adapters.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{JobId, JobStatus, LessonId, Stage, Violation};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: gate rejections, provider failures, call timeouts.
/// - `NonRetryable` errors: exhausted budgets, persistence failures, cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Failure of a single call to the external generative model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// The call did not complete within its per-call timeout.
    #[error("Model call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The provider rejected or failed the call.
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// The provider asked us to slow down.
    #[error("Rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The provider answered, but not with JSON matching the requested schema.
    #[error("Malformed model response: {message}")]
    InvalidResponse { message: String },
}

impl LlmError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            LlmError::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            LlmError::Timeout { .. } | LlmError::Provider { .. } | LlmError::InvalidResponse { .. } => {
                RetryPolicy::Retryable { after: None }
            }
        }
    }
}

/// Failure of a job store operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} already exists")]
    AlreadyExists(JobId),

    /// The requested status change is not an edge of the job state machine.
    #[error("Job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The artifact handed to `update_stage` belongs to a different stage.
    #[error("Artifact for stage {artifact} cannot be committed as stage {stage}")]
    ArtifactMismatch { stage: Stage, artifact: Stage },

    #[error("Storage I/O failed: {message}")]
    Io { message: String },

    #[error("Stored job could not be (de)serialised: {message}")]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Why one attempt at a stage did not produce a committed checkpoint.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// The stage's gate rejected the agent output.
    #[error("{stage} output failed validation with {} violation(s)", .violations.len())]
    ValidationFailure {
        stage: Stage,
        violations: Vec<Violation>,
    },

    /// The model call failed or returned something unusable.
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Model call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The retry budget for the stage is spent. Terminal.
    #[error("{stage} exhausted its retry budget after {attempts} attempt(s)")]
    ResourceExhausted { stage: Stage, attempts: u32 },

    /// A lesson in the content stage failed terminally.
    #[error("Lesson {lesson_id} failed: {reason}")]
    LessonFailed { lesson_id: LessonId, reason: String },

    /// The checkpoint write failed; the job stays at its last good state.
    #[error("Checkpoint write failed: {0}")]
    Persistence(#[from] StoreError),

    /// Cooperative cancellation. Not an error from the job's point of view.
    #[error("Cancellation requested")]
    Cancelled,
}

impl StageError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StageError::ValidationFailure { .. } | StageError::Timeout { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            StageError::Provider { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            StageError::ResourceExhausted { .. }
            | StageError::LessonFailed { .. }
            | StageError::Persistence(_)
            | StageError::Cancelled => RetryPolicy::NonRetryable,
        }
    }

    /// Gate violations carried by this error, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            StageError::ValidationFailure { violations, .. } => violations,
            _ => &[],
        }
    }

    /// Stable classification used in attempt records.
    pub fn kind(&self) -> AttemptErrorKind {
        match self {
            StageError::ValidationFailure { .. } => AttemptErrorKind::ValidationFailure,
            StageError::Provider { .. } => AttemptErrorKind::ProviderError,
            StageError::Timeout { .. } => AttemptErrorKind::TimeoutError,
            StageError::ResourceExhausted { .. } | StageError::LessonFailed { .. } => {
                AttemptErrorKind::ResourceExhausted
            }
            StageError::Persistence(_) => AttemptErrorKind::PersistenceError,
            StageError::Cancelled => AttemptErrorKind::CancellationRequested,
        }
    }
}

impl From<LlmError> for StageError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { after } => StageError::Timeout { after },
            LlmError::RateLimited { retry_after } => StageError::Provider {
                message: "rate limited".into(),
                retry_after,
            },
            other => StageError::Provider {
                message: other.to_string(),
                retry_after: None,
            },
        }
    }
}

/// Serialisable classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    ValidationFailure,
    ProviderError,
    TimeoutError,
    ResourceExhausted,
    PersistenceError,
    CancellationRequested,
}

// ---------------------------------------------------------------------------
// Executor-facing errors
// ---------------------------------------------------------------------------

/// Errors returned by the public executor operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request failed shape validation before a job was created.
    #[error("Invalid request: {}", summarize(.violations))]
    InvalidRequest { violations: Vec<Violation> },

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// Another operation currently owns the job's execution.
    #[error("Job {0} is running; wait for it to finish or cancel it first")]
    JobBusy(JobId),

    /// The job has not reached the state the operation needs.
    #[error("Job {job_id} is {status}; operation requires {required}")]
    WrongStatus {
        job_id: JobId,
        status: JobStatus,
        required: &'static str,
    },

    /// `regenerate_*` was asked for something the job does not have yet.
    #[error("Job {job_id} has no committed {stage} artifact")]
    StageNotReady { job_id: JobId, stage: Stage },

    #[error("Lesson {0} is not part of the curriculum")]
    UnknownLesson(LessonId),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Maps store lookups so a missing job reads as `JobNotFound`.
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::JobNotFound(id),
            other => PipelineError::Store(other),
        }
    }
}
