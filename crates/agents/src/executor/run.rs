//! The per-job stage loop.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    check_assessments, check_content, check_curriculum, check_intent, check_quality,
    CourseAssessments, CourseIntent, CurriculumStructure, FailureDiagnostics, Job, JobId,
    JobStatus, LessonContent, LessonId, QualityReport, Stage, StageArtifact, StageError,
    StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use super::{Claim, Inner};
use crate::pool::{LessonShared, LessonWork};
use crate::prompts::PromptStrategy;
use crate::retry::{Attempt, RetryRunner, StoreRecorder};
use crate::roles::CourseDraft;

/// Facts gathered while running, for failure diagnostics.
#[derive(Debug, Default)]
pub(super) struct RunState {
    pub stage: Option<Stage>,
    pub last_quality: Option<QualityReport>,
}

/// Adapts a closure to [`Attempt`] for stages whose attempt is one agent call
/// followed by one gate.
struct FnAttempt<F>(F);

#[async_trait]
impl<F, Fut, T> Attempt for FnAttempt<F>
where
    F: FnMut(PromptStrategy) -> Fut + Send,
    Fut: Future<Output = Result<T, StageError>> + Send,
    T: Send,
{
    type Output = T;

    async fn run(&mut self, _attempt: u32, strategy: PromptStrategy) -> Result<T, StageError> {
        (self.0)(strategy).await
    }
}

impl Inner {
    /// Starts the background task that drives a claimed job.
    pub(super) fn spawn_run(self: &Arc<Self>, claim: Claim) {
        let job_id = claim.job_id;
        let inner = self.clone();
        tokio::spawn(
            async move { inner.drive(claim).await }
                .instrument(info_span!("job", job_id = %job_id)),
        );
    }

    async fn drive(&self, claim: Claim) {
        let job_id = claim.job_id;
        let cancel = claim.cancel.clone();

        let mut state = RunState::default();
        let timeout = self.config.job_timeout();
        let outcome = self
            .watched(
                job_id,
                &cancel,
                tokio::time::timeout(timeout, self.run_stages(job_id, &cancel, &mut state)),
            )
            .await;
        let result = match outcome {
            Ok(result) => result.map_err(|err| (err, None)),
            Err(_) => {
                // Stop any lesson tasks still in flight.
                cancel.cancel();
                Err((
                    StageError::Timeout { after: timeout },
                    Some(format!("job exceeded its time limit of {timeout:?}")),
                ))
            }
        };
        if let Err((err, reason)) = result {
            self.conclude(job_id, err, reason, &state).await;
        }

        self.release(claim).await;
    }

    /// Runs stages from the job's current status until it completes.
    async fn run_stages(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), StageError> {
        loop {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let job = self.store.get_job(job_id).await?;
            let stage = match job.status {
                JobStatus::QaDone => {
                    self.store
                        .set_status(job_id, JobStatus::Complete, None)
                        .await?;
                    info!("Course generation complete");
                    self.notify(job_id, JobStatus::QaDone, JobStatus::Complete, None);
                    return Ok(());
                }
                status => match status.next_stage() {
                    Some(stage) => stage,
                    None => return Ok(()),
                },
            };

            state.stage = Some(stage);
            self.store.begin_stage(job_id, stage).await?;
            info!(stage = %stage, "Stage started");

            let artifact = self.produce(&job, stage, cancel, state, true).await?;
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            let to = JobStatus::after(stage);
            self.store.update_stage(job_id, stage, artifact, to).await?;
            info!(stage = %stage, status = %to, "Checkpoint committed");
            self.notify(job_id, job.status, to, Some(stage));
        }
    }

    /// Runs `stage` for `job` with retries and its gate; returns the artifact
    /// to commit. Nothing is persisted here except attempt records and, for QA
    /// with `targeted` set, regenerated lessons.
    pub(super) async fn produce(
        &self,
        job: &Job,
        stage: Stage,
        cancel: &CancellationToken,
        state: &mut RunState,
        targeted: bool,
    ) -> Result<StageArtifact, StageError> {
        let recorder = StoreRecorder {
            store: self.store.clone(),
            job_id: job.id,
        };
        let runner = RetryRunner {
            config: &self.config,
            cancel,
            recorder: &recorder,
        };
        let agents = &self.agents;
        let gates = &self.config.gates;

        match stage {
            Stage::Intent => {
                let request = &job.request;
                let mut unit = FnAttempt(|strategy| async move {
                    let intent = agents.intent.extract(request, strategy, cancel).await?;
                    check_intent(&intent, gates).into_result()?;
                    Ok::<_, StageError>(intent)
                });
                runner.run(stage, None, &mut unit).await.map(StageArtifact::Intent)
            }
            Stage::Curriculum => {
                let intent = require(job, job.artifacts.intent.as_ref(), Stage::Intent)?;
                let mut unit = FnAttempt(|strategy| async move {
                    let curriculum = agents
                        .curriculum
                        .design(intent, gates, strategy, cancel)
                        .await?;
                    check_curriculum(&curriculum, gates).into_result()?;
                    Ok::<_, StageError>(curriculum)
                });
                runner
                    .run(stage, None, &mut unit)
                    .await
                    .map(StageArtifact::Curriculum)
            }
            Stage::Content => {
                let intent = require(job, job.artifacts.intent.as_ref(), Stage::Intent)?;
                let curriculum =
                    require(job, job.artifacts.curriculum.as_ref(), Stage::Curriculum)?;
                let lessons = self
                    .author_lessons(job.id, intent, curriculum, None, cancel)
                    .await?;
                check_content(curriculum, &lessons, gates).into_result()?;
                Ok(StageArtifact::Content(lessons))
            }
            Stage::Assessment => {
                let intent = require(job, job.artifacts.intent.as_ref(), Stage::Intent)?;
                let curriculum =
                    require(job, job.artifacts.curriculum.as_ref(), Stage::Curriculum)?;
                let mut unit = FnAttempt(|strategy| async move {
                    let assessments = agents
                        .assessment
                        .design(intent, curriculum, strategy, cancel)
                        .await?;
                    check_assessments(curriculum, &assessments, gates).into_result()?;
                    Ok::<_, StageError>(assessments)
                });
                runner
                    .run(stage, None, &mut unit)
                    .await
                    .map(StageArtifact::Assessment)
            }
            Stage::Qa => {
                let mut unit = ReviewAttempt {
                    inner: self,
                    job_id: job.id,
                    intent: require(job, job.artifacts.intent.as_ref(), Stage::Intent)?,
                    curriculum: require(job, job.artifacts.curriculum.as_ref(), Stage::Curriculum)?,
                    assessments: require(job, job.artifacts.assessments.as_ref(), Stage::Assessment)?,
                    lessons: require(job, job.artifacts.content.as_ref(), Stage::Content)?.clone(),
                    cancel,
                    targeted,
                    last_report: None,
                };
                let outcome = runner.run(stage, None, &mut unit).await;
                state.last_quality = unit.last_report;
                outcome.map(StageArtifact::Qa)
            }
        }
    }

    /// Authors `only` (or every lesson, in curriculum order) through the pool.
    pub(super) async fn author_lessons(
        &self,
        job_id: JobId,
        intent: &CourseIntent,
        curriculum: &CurriculumStructure,
        only: Option<&[LessonId]>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LessonContent>, StageError> {
        let work: Vec<LessonWork> = curriculum
            .lessons()
            .filter(|(_, lesson)| only.map_or(true, |ids| ids.contains(&lesson.id)))
            .map(|(module, lesson)| LessonWork {
                module_title: module.title.clone(),
                outline: lesson.clone(),
            })
            .collect();
        info!(lessons = work.len(), "Authoring lessons");

        let shared = Arc::new(LessonShared {
            agents: self.agents.clone(),
            config: self.config.clone(),
            recorder: Arc::new(StoreRecorder {
                store: self.store.clone(),
                job_id,
            }),
            intent: intent.clone(),
        });
        self.pool.author(shared, work, cancel).await
    }

    /// Moves a stopped job to its terminal status.
    async fn conclude(&self, job_id: JobId, err: StageError, reason: Option<String>, state: &RunState) {
        let job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(store_err) => {
                error!(error = %store_err, "Job could not be loaded to record its outcome");
                return;
            }
        };

        let (status, failure) = match err {
            StageError::Cancelled => {
                info!("Job cancelled");
                (JobStatus::Cancelled, None)
            }
            err => {
                let diagnostics = diagnose(&job, &err, reason, state);
                error!(
                    stage = %diagnostics.stage,
                    retry_count = diagnostics.retry_count,
                    reason = %diagnostics.reason,
                    "Job failed"
                );
                (JobStatus::Failed, Some(diagnostics))
            }
        };

        match self.store.set_status(job_id, status, failure).await {
            Ok(_) => self.notify(job_id, job.status, status, job.current_stage),
            Err(store_err) => {
                error!(error = %store_err, status = %status, "Terminal status could not be recorded")
            }
        }
    }
}

fn diagnose(job: &Job, err: &StageError, reason: Option<String>, state: &RunState) -> FailureDiagnostics {
    let stage = state
        .stage
        .or(job.current_stage)
        .unwrap_or(Stage::Intent);
    let violations = if err.violations().is_empty() {
        job.error_history
            .iter()
            .rev()
            .find(|record| record.stage == stage)
            .map(|record| record.violations.clone())
            .unwrap_or_default()
    } else {
        err.violations().to_vec()
    };
    FailureDiagnostics {
        stage,
        retry_count: job.retry_count(stage),
        reason: reason.unwrap_or_else(|| err.to_string()),
        violations,
        quality_report: if stage == Stage::Qa {
            state.last_quality.clone()
        } else {
            None
        },
    }
}

/// A committed upstream artifact, or an error if the stored job is inconsistent.
fn require<'a, T>(job: &Job, artifact: Option<&'a T>, stage: Stage) -> Result<&'a T, StageError> {
    artifact.ok_or_else(|| {
        StageError::Persistence(StoreError::Serialization {
            message: format!("job {} is {} but has no {stage} artifact", job.id, job.status),
        })
    })
}

/// Replaces lessons in `lessons` with their regenerated versions, by id.
pub(super) fn splice(lessons: &mut Vec<LessonContent>, fresh: Vec<LessonContent>) {
    for lesson in fresh {
        match lessons.iter_mut().find(|l| l.lesson_id == lesson.lesson_id) {
            Some(slot) => *slot = lesson,
            None => lessons.push(lesson),
        }
    }
}

/// One QA review. A failing review with lesson-specific findings triggers
/// regeneration of those lessons before the next review.
struct ReviewAttempt<'a> {
    inner: &'a Inner,
    job_id: JobId,
    intent: &'a CourseIntent,
    curriculum: &'a CurriculumStructure,
    assessments: &'a CourseAssessments,
    lessons: Vec<LessonContent>,
    cancel: &'a CancellationToken,
    targeted: bool,
    last_report: Option<QualityReport>,
}

#[async_trait]
impl Attempt for ReviewAttempt<'_> {
    type Output = QualityReport;

    async fn run(&mut self, attempt: u32, strategy: PromptStrategy) -> Result<QualityReport, StageError> {
        let gates = &self.inner.config.gates;
        let draft = CourseDraft {
            intent: self.intent,
            curriculum: self.curriculum,
            lessons: &self.lessons,
            assessments: self.assessments,
        };
        let mut report = self
            .inner
            .agents
            .quality
            .review(&draft, strategy, self.cancel)
            .await?;

        let verdict = check_quality(&report, gates);
        report.passed = verdict.passed();
        self.last_report = Some(report.clone());
        if verdict.passed() {
            info!(score = report.score, "Quality review passed");
            return Ok(report);
        }

        let retries_left = attempt < self.inner.config.max_retries;
        if self.targeted && retries_left {
            self.regenerate_flagged(&report).await?;
        }
        Err(StageError::ValidationFailure {
            stage: Stage::Qa,
            violations: verdict.violations,
        })
    }
}

impl ReviewAttempt<'_> {
    async fn regenerate_flagged(&mut self, report: &QualityReport) -> Result<(), StageError> {
        let flagged: Vec<LessonId> = report
            .flagged_lessons()
            .into_iter()
            .filter(|id| self.curriculum.lesson(id).is_some())
            .collect();
        if flagged.is_empty() {
            return Ok(());
        }
        info!(
            score = report.score,
            lessons = flagged.len(),
            "Regenerating lessons flagged by review"
        );

        let fresh = self
            .inner
            .author_lessons(self.job_id, self.intent, self.curriculum, Some(&flagged), self.cancel)
            .await?;
        let mut lessons = self.lessons.clone();
        splice(&mut lessons, fresh);
        check_content(self.curriculum, &lessons, &self.inner.config.gates).into_result()?;
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let status = self.inner.store.get_job(self.job_id).await?.status;
        self.inner
            .store
            .update_stage(
                self.job_id,
                Stage::Content,
                StageArtifact::Content(lessons.clone()),
                status,
            )
            .await?;
        self.lessons = lessons;
        Ok(())
    }
}
