//! Port traits implemented by infrastructure crates.
//!
//! The domain defines *what* it needs from the outside world; `llm` and `store`
//! define *how*. Every trait is object-safe via `async_trait` so the executor
//! can hold `Arc<dyn ...>` and tests can substitute scripted fakes.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    FailureDiagnostics, Job, JobFilter, JobId, JobStatus, LlmError, ModelId, ModelTier, Stage,
    StageArtifact, StoreError, AttemptRecord,
};

// ---------------------------------------------------------------------------
// LLM client
// ---------------------------------------------------------------------------

/// One structured-output call to a generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub stage: Stage,
    pub model: ModelId,
    pub tier: ModelTier,
    /// Instructions framing the task (opaque to the pipeline).
    pub system: String,
    /// Task-specific prompt.
    pub prompt: String,
    /// Short description of the JSON shape expected back.
    pub response_schema: String,
    pub timeout: Duration,
}

/// Capability: `invoke(prompt, model_tier, timeout) -> structured_json`.
///
/// Implementations return parsed JSON or fail with [`LlmError`]; they make no
/// promise that the JSON matches the requested schema. Callers validate.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<serde_json::Value, LlmError>;
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// Durable job persistence.
///
/// `update_stage` is the crash-consistency backbone: the artifact and the new
/// status are committed together or not at all. A stage whose artifact was
/// produced but never committed is, from the store's point of view, simply not
/// done.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job. Fails with [`StoreError::AlreadyExists`] on id reuse.
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomically stores `artifact` for `stage` and moves the job to `status`.
    ///
    /// `status` must be a legal transition from the job's current status
    /// (re-committing the current status is legal and replaces the artifact).
    async fn update_stage(
        &self,
        job_id: JobId,
        stage: Stage,
        artifact: StageArtifact,
        status: JobStatus,
    ) -> Result<Job, StoreError>;

    /// Appends a failed attempt to the job's history and bumps its stage retry count.
    async fn record_attempt(&self, job_id: JobId, attempt: AttemptRecord) -> Result<Job, StoreError>;

    /// Marks the stage the executor is working on. Does not change status.
    async fn begin_stage(&self, job_id: JobId, stage: Stage) -> Result<Job, StoreError>;

    /// Moves the job to a terminal status (or back to its checkpoint when
    /// `status` is not terminal, for resume), attaching diagnostics.
    async fn set_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        failure: Option<FailureDiagnostics>,
    ) -> Result<Job, StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError>;

    /// Jobs matching `filter`, oldest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Takes exclusive ownership of a job across every executor sharing this
    /// store. `Ok(None)` means another owner holds it. Taking the lease clears
    /// any stale cancellation request.
    async fn acquire_lease(&self, job_id: JobId) -> Result<Option<JobLease>, StoreError>;

    /// Asks whichever executor owns the job to cancel it.
    async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError>;

    async fn cancel_requested(&self, job_id: JobId) -> Result<bool, StoreError>;
}

/// Ownership of one job, released when dropped.
pub struct JobLease {
    _held: Box<dyn Any + Send + Sync>,
}

impl JobLease {
    /// Wraps whatever keeps the lease alive (a lock file handle, a map guard).
    pub fn new(held: impl Any + Send + Sync) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl std::fmt::Debug for JobLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JobLease")
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// A stage transition, as reported to a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub stage: Option<Stage>,
}

/// Fire-and-forget transition sink. Failures are logged and never fail a job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, transition: StageTransition) -> Result<(), String>;
}
