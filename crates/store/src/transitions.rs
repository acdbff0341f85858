//! Mutation rules shared by every [`pipeline::JobStore`] implementation.
//!
//! Each function validates first and mutates only on success, so a rejected
//! call leaves the job untouched.

use pipeline::{
    AttemptRecord, FailureDiagnostics, Job, JobStatus, Stage, StageArtifact, StoreError,
    Timestamp,
};

/// Commits `artifact` for `stage` and moves the job to `status`.
///
/// Two shapes are accepted:
/// - forward progress: `status` is the status reached after `stage` and is the
///   next edge of the state machine;
/// - in-place replacement: `status` equals the current status and the job's
///   checkpoint already covers `stage` (regeneration).
pub fn apply_stage(
    job: &mut Job,
    stage: Stage,
    artifact: StageArtifact,
    status: JobStatus,
) -> Result<(), StoreError> {
    if artifact.stage() != stage {
        return Err(StoreError::ArtifactMismatch {
            stage,
            artifact: artifact.stage(),
        });
    }

    let forward = status == JobStatus::after(stage) && job.status.can_transition_to(status);
    let replace = status == job.status && job.checkpoint.has_completed(stage);
    if !(forward || replace) {
        return Err(StoreError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to: status,
        });
    }

    if !forward {
        let calls = rewritten_calls(job, &artifact);
        *job.rewrite_calls.entry(stage).or_insert(0) += calls;
    }
    job.artifacts.set(artifact);
    job.status = status;
    if !status.is_terminal() {
        job.checkpoint = status;
    }
    job.current_stage = Some(stage);
    job.updated_at = Timestamp::now();
    Ok(())
}

/// Calls that produced `replacement`: one per lesson that differs from the
/// committed lesson set, one for any other artifact.
fn rewritten_calls(job: &Job, replacement: &StageArtifact) -> u32 {
    match replacement {
        StageArtifact::Content(lessons) => {
            let committed = job.artifacts.content.as_deref().unwrap_or_default();
            lessons.iter().filter(|l| !committed.contains(l)).count() as u32
        }
        _ => 1,
    }
}

/// Appends a failed attempt and bumps the stage's retry counter.
pub fn apply_attempt(job: &mut Job, attempt: AttemptRecord) {
    *job.retry_counts.entry(attempt.stage).or_insert(0) += 1;
    job.current_stage = Some(attempt.stage);
    job.error_history.push(attempt);
    job.updated_at = Timestamp::now();
}

pub fn apply_begin(job: &mut Job, stage: Stage) {
    job.current_stage = Some(stage);
    job.updated_at = Timestamp::now();
}

/// Moves the job to a terminal status, or restores its checkpoint for resume.
pub fn apply_status(
    job: &mut Job,
    status: JobStatus,
    failure: Option<FailureDiagnostics>,
) -> Result<(), StoreError> {
    let resuming = !status.is_terminal()
        && status == job.checkpoint
        && matches!(job.status, JobStatus::Failed | JobStatus::Cancelled);
    let finishing = status.is_terminal() && job.status.can_transition_to(status);
    let finishing = finishing
        && (status != JobStatus::Complete || job.status == JobStatus::QaDone || job.status == status);

    if !(resuming || finishing) {
        return Err(StoreError::InvalidTransition {
            job_id: job.id,
            from: job.status,
            to: status,
        });
    }

    job.status = status;
    job.failure = if resuming { None } else { failure };
    job.updated_at = Timestamp::now();
    Ok(())
}
