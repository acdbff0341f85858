use std::sync::Arc;

use pipeline::{
    CourseAssessments, CourseIntent, CurriculumStructure, LessonContent, QualityIssue,
    QualityReport, Stage, StageError,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::gateway::LlmGateway;
use crate::prompts::{self, PromptStrategy, REVIEW_SCHEMA};

/// Everything the reviewer sees: the course as it would be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct CourseDraft<'a> {
    pub intent: &'a CourseIntent,
    pub curriculum: &'a CurriculumStructure,
    pub lessons: &'a [LessonContent],
    pub assessments: &'a CourseAssessments,
}

/// Scores an assembled course and lists its issues.
pub struct QualityReviewer {
    gateway: Arc<LlmGateway>,
}

/// The verdict is computed by Gate 5, so the model only supplies findings.
#[derive(Debug, Deserialize)]
struct ReviewDraft {
    score: f64,
    #[serde(default)]
    issues: Vec<QualityIssue>,
}

impl QualityReviewer {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn review(
        &self,
        draft: &CourseDraft<'_>,
        strategy: PromptStrategy,
        cancel: &CancellationToken,
    ) -> Result<QualityReport, StageError> {
        let prompt = prompts::build(
            strategy,
            "course quality reviewer",
            "Score the course from 0 to 100 for accuracy, coherence and fit to the stated \
             objectives. Report each problem as an issue; name the lesson id when the problem \
             is confined to one lesson.",
            draft,
            REVIEW_SCHEMA,
        );
        let review: ReviewDraft = self.gateway.call(Stage::Qa, prompt, cancel).await?;
        Ok(QualityReport {
            score: review.score,
            issues: review.issues,
            passed: false,
        })
    }
}
