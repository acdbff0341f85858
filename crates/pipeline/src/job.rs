//! Job records and the job state machine.
//!
//! A [`Job`] is owned by the job store and mutated only by the executor. Its
//! [`JobStatus`] follows a strict linear progression with two terminal escape
//! hatches:
//!
//! ```text
//! PENDING → INTENT_DONE → CURRICULUM_DONE → CONTENT_DONE → ASSESSMENT_DONE → QA_DONE → COMPLETE
//!    └───────────┴──────────────┴────────────────┴────────────────┴─────────────┴──→ FAILED | CANCELLED
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    AttemptErrorKind, CourseAssessments, CourseGenerationRequest, CourseIntent,
    CurriculumStructure, GeneratedCourse, JobId, LessonContent, QualityReport, Stage,
    StageArtifact, StageError, Timestamp, UserId, Violation,
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Position of a job in the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    IntentDone,
    CurriculumDone,
    ContentDone,
    AssessmentDone,
    QaDone,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Progress statuses in order, excluding the failure terminals.
    const PROGRESSION: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::IntentDone,
        JobStatus::CurriculumDone,
        JobStatus::ContentDone,
        JobStatus::AssessmentDone,
        JobStatus::QaDone,
        JobStatus::Complete,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Index along the progression, `None` for FAILED/CANCELLED.
    fn rank(self) -> Option<usize> {
        Self::PROGRESSION.iter().position(|s| *s == self)
    }

    /// Status reached once `stage` has been checkpointed.
    pub fn after(stage: Stage) -> JobStatus {
        match stage {
            Stage::Intent => JobStatus::IntentDone,
            Stage::Curriculum => JobStatus::CurriculumDone,
            Stage::Content => JobStatus::ContentDone,
            Stage::Assessment => JobStatus::AssessmentDone,
            Stage::Qa => JobStatus::QaDone,
        }
    }

    /// The stage that runs from this status, if any.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            JobStatus::Pending => Some(Stage::Intent),
            JobStatus::IntentDone => Some(Stage::Curriculum),
            JobStatus::CurriculumDone => Some(Stage::Content),
            JobStatus::ContentDone => Some(Stage::Assessment),
            JobStatus::AssessmentDone => Some(Stage::Qa),
            JobStatus::QaDone
            | JobStatus::Complete
            | JobStatus::Failed
            | JobStatus::Cancelled => None,
        }
    }

    /// Whether `stage`'s checkpoint is committed at this progress status.
    pub fn has_completed(self, stage: Stage) -> bool {
        match (self.rank(), JobStatus::after(stage).rank()) {
            (Some(current), Some(needed)) => current >= needed,
            _ => false,
        }
    }

    /// Whether `self -> to` is an edge of the state machine.
    ///
    /// Re-committing the current status is allowed so that a stage artifact can
    /// be replaced in place (regeneration) without moving the job.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        if self == to {
            return true;
        }
        if self.is_terminal() {
            // Terminal jobs only move again through an explicit resume, which
            // restores their last checkpoint.
            return false;
        }
        match to {
            JobStatus::Failed | JobStatus::Cancelled => true,
            _ => match (self.rank(), to.rank()) {
                (Some(from), Some(target)) => target == from + 1,
                _ => false,
            },
        }
    }

    /// Rough completion percentage for status polling.
    pub fn progress_pct(self) -> u8 {
        match self.rank() {
            Some(rank) => (rank * 100 / (Self::PROGRESSION.len() - 1)) as u8,
            None => 0,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::IntentDone => "INTENT_DONE",
            JobStatus::CurriculumDone => "CURRICULUM_DONE",
            JobStatus::ContentDone => "CONTENT_DONE",
            JobStatus::AssessmentDone => "ASSESSMENT_DONE",
            JobStatus::QaDone => "QA_DONE",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    /// Accepts the display form (`QA_DONE`) case-insensitively, with `-` for `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Self::PROGRESSION
            .into_iter()
            .chain([JobStatus::Failed, JobStatus::Cancelled])
            .find(|status| status.to_string().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Attempt history and diagnostics
// ---------------------------------------------------------------------------

/// One failed attempt at a stage, kept in the job's error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub stage: Stage,
    /// Zero-based attempt index within the stage run.
    pub attempt: u32,
    /// Index of the prompt variant used for the attempt.
    pub prompt_variant: usize,
    pub kind: AttemptErrorKind,
    pub message: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
    pub at: Timestamp,
}

impl AttemptRecord {
    pub fn from_error(stage: Stage, attempt: u32, prompt_variant: usize, err: &StageError) -> Self {
        Self {
            stage,
            attempt,
            prompt_variant,
            kind: err.kind(),
            message: err.to_string(),
            violations: err.violations().to_vec(),
            at: Timestamp::now(),
        }
    }
}

/// Structured diagnostics surfaced for a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDiagnostics {
    /// Last stage the executor attempted.
    pub stage: Stage,
    pub retry_count: u32,
    pub reason: String,
    /// Violations from the last gate run.
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Attached when the QA stage was the one that failed.
    #[serde(default)]
    pub quality_report: Option<QualityReport>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Committed artifacts, one slot per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageArtifacts {
    pub intent: Option<CourseIntent>,
    pub curriculum: Option<CurriculumStructure>,
    pub content: Option<Vec<LessonContent>>,
    pub assessments: Option<CourseAssessments>,
    pub quality: Option<QualityReport>,
}

impl StageArtifacts {
    /// Stores `artifact` in its slot, replacing any previous value.
    pub fn set(&mut self, artifact: StageArtifact) {
        match artifact {
            StageArtifact::Intent(a) => self.intent = Some(a),
            StageArtifact::Curriculum(a) => self.curriculum = Some(a),
            StageArtifact::Content(a) => self.content = Some(a),
            StageArtifact::Assessment(a) => self.assessments = Some(a),
            StageArtifact::Qa(a) => self.quality = Some(a),
        }
    }

    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Intent => self.intent.is_some(),
            Stage::Curriculum => self.curriculum.is_some(),
            Stage::Content => self.content.is_some(),
            Stage::Assessment => self.assessments.is_some(),
            Stage::Qa => self.quality.is_some(),
        }
    }
}

/// One end-to-end generation request and its pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: CourseGenerationRequest,
    pub status: JobStatus,
    /// Last committed progress status. Equals `status` while the job is
    /// progressing; preserved through FAILED/CANCELLED so resume knows which
    /// stages are durable.
    pub checkpoint: JobStatus,
    /// Stage currently (or last) being worked on.
    pub current_stage: Option<Stage>,
    pub artifacts: StageArtifacts,
    /// Failed attempts per stage.
    pub retry_counts: BTreeMap<Stage, u32>,
    /// Successful model calls spent replacing an already committed artifact:
    /// lessons rewritten after review, or an explicit regeneration.
    #[serde(default)]
    pub rewrite_calls: BTreeMap<Stage, u32>,
    pub error_history: Vec<AttemptRecord>,
    pub failure: Option<FailureDiagnostics>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// A fresh PENDING job for `request`.
    pub fn new(request: CourseGenerationRequest) -> Self {
        let now = Timestamp::now();
        Self {
            id: JobId::new_random(),
            request,
            status: JobStatus::Pending,
            checkpoint: JobStatus::Pending,
            current_stage: None,
            artifacts: StageArtifacts::default(),
            retry_counts: BTreeMap::new(),
            rewrite_calls: BTreeMap::new(),
            error_history: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    /// The finished course, when every artifact is present.
    pub fn course(&self) -> Option<GeneratedCourse> {
        let a = &self.artifacts;
        Some(GeneratedCourse {
            intent: a.intent.clone()?,
            curriculum: a.curriculum.clone()?,
            lessons: a.content.clone()?,
            assessments: a.assessments.clone()?,
            quality: a.quality.clone()?,
        })
    }

    /// Snapshot for status polling.
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            status: self.status,
            stage: self.current_stage,
            progress_pct: self.checkpoint.progress_pct(),
            error: self.failure.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Caller-facing views
// ---------------------------------------------------------------------------

/// Returned immediately by `generate_course` and `resume_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// Answer to `get_job_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: Option<Stage>,
    pub progress_pct: u8,
    pub error: Option<FailureDiagnostics>,
}

/// Filter for `list_jobs`. Empty filter matches every job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub user_id: Option<UserId>,
    /// Only jobs that have not reached a terminal state.
    #[serde(default)]
    pub active_only: bool,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| s == job.status)
            && self
                .user_id
                .as_ref()
                .map_or(true, |u| *u == job.request.user_id)
            && (!self.active_only || !job.status.is_terminal())
    }
}
