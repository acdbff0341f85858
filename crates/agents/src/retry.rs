//! Bounded retry with fallback prompts and exponential back-off.
//!
//! One failed attempt: record it, wait `backoff_base × 2^attempt` (or the
//! provider's `retry-after`, whichever is longer), then try again with the next
//! prompt variant. At most `1 + max_retries` attempts are made; after that the
//! unit of work fails with [`StageError::ResourceExhausted`].

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{AttemptRecord, JobId, JobStore, LessonId, PipelineConfig, RetryPolicy, Stage, StageError, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::prompts::PromptStrategy;

/// One retryable unit of work: a stage, or a single lesson.
#[async_trait]
pub(crate) trait Attempt: Send {
    type Output: Send;

    async fn run(&mut self, attempt: u32, strategy: PromptStrategy) -> Result<Self::Output, StageError>;
}

/// Where failed attempts are written.
#[async_trait]
pub(crate) trait AttemptRecorder: Send + Sync {
    async fn record(&self, record: AttemptRecord) -> Result<(), StoreError>;
}

/// Records attempts into the job's history in the store.
pub(crate) struct StoreRecorder {
    pub store: Arc<dyn JobStore>,
    pub job_id: JobId,
}

#[async_trait]
impl AttemptRecorder for StoreRecorder {
    async fn record(&self, record: AttemptRecord) -> Result<(), StoreError> {
        self.store.record_attempt(self.job_id, record).await.map(|_| ())
    }
}

pub(crate) struct RetryRunner<'a> {
    pub config: &'a PipelineConfig,
    pub cancel: &'a CancellationToken,
    pub recorder: &'a dyn AttemptRecorder,
}

impl RetryRunner<'_> {
    /// Runs `unit` until it succeeds, fails terminally, or exhausts its budget.
    ///
    /// `lesson` labels attempt records made at lesson granularity.
    pub async fn run<A: Attempt>(
        &self,
        stage: Stage,
        lesson: Option<&LessonId>,
        unit: &mut A,
    ) -> Result<A::Output, StageError> {
        let max_retries = self.config.max_retries;
        for attempt in 0..=max_retries {
            if self.cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let variant = PromptStrategy::index_for_attempt(attempt);
            let err = match unit.run(attempt, PromptStrategy::from_index(variant)).await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            let delay = match err.retry_policy() {
                RetryPolicy::NonRetryable => return Err(err),
                RetryPolicy::Retryable { after } => {
                    let backoff = self.config.backoff(attempt);
                    after.map_or(backoff, |a| a.max(backoff))
                }
            };

            let mut record = AttemptRecord::from_error(stage, attempt, variant, &err);
            if let Some(id) = lesson {
                record.message = format!("lesson {id}: {}", record.message);
            }
            warn!(
                stage = %stage,
                lesson = lesson.map(|l| l.as_str()),
                attempt,
                variant,
                error = %err,
                "Attempt failed"
            );
            self.recorder.record(record).await?;

            if attempt == max_retries {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StageError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Err(StageError::ResourceExhausted {
            stage,
            attempts: max_retries + 1,
        })
    }
}
