//! Default notifier: stage transitions become structured log events.

use async_trait::async_trait;
use pipeline::{Notifier, StageTransition};
use tracing::info;

/// Emits one `info` event per transition under the `courseforge::transition`
/// target, so subscribers can route them separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, transition: StageTransition) -> Result<(), String> {
        info!(
            target: "courseforge::transition",
            job_id = %transition.job_id,
            from = %transition.from,
            to = %transition.to,
            stage = ?transition.stage,
            "Job status changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{JobId, JobStatus, Stage};

    #[tokio::test]
    async fn test_tracing_notifier_never_fails() {
        let transition = StageTransition {
            job_id: JobId::new_random(),
            from: JobStatus::Pending,
            to: JobStatus::IntentDone,
            stage: Some(Stage::Intent),
        };
        assert_eq!(TracingNotifier.notify(transition).await, Ok(()));
    }
}
