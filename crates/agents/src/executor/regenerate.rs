//! Stage-scoped and lesson-scoped regeneration.
//!
//! Regeneration replaces one committed artifact in place. The job's status
//! does not move, downstream artifacts are left alone, and only the gates that
//! read the replaced artifact are re-run and reported.

use pipeline::{
    check_assessments, check_content, check_curriculum, check_intent, check_quality, GateConfig,
    GateResult, Job, JobId, LessonId, PipelineError, Stage, StageArtifact, StageError, Violation,
    ViolationCode,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::run::{splice, RunState};
use super::{Inner, PipelineExecutor};

/// Outcome of a regeneration: the replaced artifact's own gate followed by
/// the gates that depend on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegenerationReport {
    pub job_id: JobId,
    pub stage: Stage,
    /// Lessons rewritten, for content regeneration.
    pub lessons: Vec<LessonId>,
    pub gates: Vec<GateResult>,
}

impl RegenerationReport {
    pub fn all_passed(&self) -> bool {
        self.gates.iter().all(GateResult::passed)
    }
}

impl PipelineExecutor {
    /// Re-runs exactly `stage` for a job that has already committed it.
    ///
    /// On success the new artifact replaces the old one. When the stage
    /// exhausts its retries the old artifact is kept and the error returned.
    #[instrument(skip(self))]
    pub async fn regenerate_component(
        &self,
        job_id: JobId,
        stage: Stage,
    ) -> Result<RegenerationReport, PipelineError> {
        let inner = &self.inner;
        let claim = inner.claim(job_id).await?;
        let result = inner
            .watched(
                job_id,
                &claim.cancel,
                inner.regenerate_stage(job_id, stage, &claim.cancel),
            )
            .await;
        inner.release(claim).await;
        result
    }

    /// Rewrites the named lessons and re-validates the whole lesson set.
    #[instrument(skip(self, lesson_ids), fields(lessons = lesson_ids.len()))]
    pub async fn regenerate_lessons(
        &self,
        job_id: JobId,
        lesson_ids: &[LessonId],
    ) -> Result<RegenerationReport, PipelineError> {
        if lesson_ids.is_empty() {
            return Err(PipelineError::InvalidRequest {
                violations: vec![Violation::new(
                    ViolationCode::EmptyField,
                    "lesson_ids",
                    "at least one lesson id is required",
                )],
            });
        }
        let inner = &self.inner;
        let claim = inner.claim(job_id).await?;
        let result = inner
            .watched(
                job_id,
                &claim.cancel,
                inner.regenerate_some_lessons(job_id, lesson_ids, &claim.cancel),
            )
            .await;
        inner.release(claim).await;
        result
    }
}

impl Inner {
    async fn committed(&self, job_id: JobId, stage: Stage) -> Result<Job, PipelineError> {
        let job = self.load(job_id).await?;
        if !(job.artifacts.has(stage) && job.checkpoint.has_completed(stage)) {
            return Err(PipelineError::StageNotReady { job_id, stage });
        }
        Ok(job)
    }

    async fn regenerate_stage(
        &self,
        job_id: JobId,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<RegenerationReport, PipelineError> {
        let job = self.committed(job_id, stage).await?;
        info!(stage = %stage, "Regenerating stage");

        let mut state = RunState::default();
        let artifact = self.produce(&job, stage, cancel, &mut state, false).await?;
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled.into());
        }

        let own = self.own_gate(&job, &artifact);
        let dependents = dependent_gates(&job, &artifact, &self.config.gates);
        let updated = self
            .store
            .update_stage(job_id, stage, artifact, job.status)
            .await?;
        info!(stage = %stage, status = %updated.status, "Regenerated artifact committed");

        let mut gates = vec![own];
        gates.extend(dependents);
        Ok(RegenerationReport {
            job_id,
            stage,
            lessons: match stage {
                Stage::Content => updated
                    .artifacts
                    .curriculum
                    .iter()
                    .flat_map(|c| c.lessons().map(|(_, l)| l.id.clone()))
                    .collect(),
                _ => Vec::new(),
            },
            gates,
        })
    }

    async fn regenerate_some_lessons(
        &self,
        job_id: JobId,
        lesson_ids: &[LessonId],
        cancel: &CancellationToken,
    ) -> Result<RegenerationReport, PipelineError> {
        let job = self.committed(job_id, Stage::Content).await?;
        let (Some(intent), Some(curriculum), Some(current)) = (
            job.artifacts.intent.as_ref(),
            job.artifacts.curriculum.as_ref(),
            job.artifacts.content.as_ref(),
        ) else {
            return Err(PipelineError::StageNotReady {
                job_id,
                stage: Stage::Content,
            });
        };
        if let Some(unknown) = lesson_ids.iter().find(|id| curriculum.lesson(id).is_none()) {
            return Err(PipelineError::UnknownLesson(unknown.clone()));
        }

        let fresh = self
            .author_lessons(job_id, intent, curriculum, Some(lesson_ids), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled.into());
        }
        let mut lessons = current.clone();
        splice(&mut lessons, fresh);

        let verdict = check_content(curriculum, &lessons, &self.config.gates);
        if !verdict.passed() {
            return Err(StageError::ValidationFailure {
                stage: Stage::Content,
                violations: verdict.violations,
            }
            .into());
        }
        self.store
            .update_stage(job_id, Stage::Content, StageArtifact::Content(lessons), job.status)
            .await?;
        info!(lessons = lesson_ids.len(), "Regenerated lessons committed");

        Ok(RegenerationReport {
            job_id,
            stage: Stage::Content,
            lessons: curriculum
                .lessons()
                .map(|(_, l)| l.id.clone())
                .filter(|id| lesson_ids.contains(id))
                .collect(),
            gates: vec![verdict],
        })
    }

    /// Re-runs the gate of the artifact's own stage against the job's inputs.
    fn own_gate(&self, job: &Job, artifact: &StageArtifact) -> GateResult {
        let gates = &self.config.gates;
        match artifact {
            StageArtifact::Intent(intent) => check_intent(intent, gates),
            StageArtifact::Curriculum(curriculum) => check_curriculum(curriculum, gates),
            StageArtifact::Content(lessons) => match job.artifacts.curriculum.as_ref() {
                Some(curriculum) => check_content(curriculum, lessons, gates),
                None => GateResult::new(Stage::Content, Vec::new()),
            },
            StageArtifact::Assessment(assessments) => match job.artifacts.curriculum.as_ref() {
                Some(curriculum) => check_assessments(curriculum, assessments, gates),
                None => GateResult::new(Stage::Assessment, Vec::new()),
            },
            StageArtifact::Qa(report) => check_quality(report, gates),
        }
    }
}

/// Gates that read the regenerated artifact, run against the job's other
/// committed artifacts.
///
/// Only the curriculum has direct dependents: lesson coverage (Gate 3) and
/// per-module question coverage (Gate 4) are both defined relative to it.
fn dependent_gates(
    job: &Job,
    artifact: &StageArtifact,
    gates: &GateConfig,
) -> Vec<GateResult> {
    let StageArtifact::Curriculum(curriculum) = artifact else {
        return Vec::new();
    };
    let mut results = Vec::new();
    if let Some(lessons) = job.artifacts.content.as_ref() {
        results.push(check_content(curriculum, lessons, gates));
    }
    if let Some(assessments) = job.artifacts.assessments.as_ref() {
        results.push(check_assessments(curriculum, assessments, gates));
    }
    results
}
