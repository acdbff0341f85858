use std::sync::Arc;

use pipeline::{CourseAssessments, CourseIntent, CurriculumStructure, Stage, StageError};
use tokio_util::sync::CancellationToken;

use crate::gateway::LlmGateway;
use crate::prompts::{self, PromptStrategy, ASSESSMENT_SCHEMA};

/// Designs a question set for every module.
pub struct AssessmentDesigner {
    gateway: Arc<LlmGateway>,
}

impl AssessmentDesigner {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn design(
        &self,
        intent: &CourseIntent,
        curriculum: &CurriculumStructure,
        strategy: PromptStrategy,
        cancel: &CancellationToken,
    ) -> Result<CourseAssessments, StageError> {
        let inputs = serde_json::json!({
            "level": intent.level,
            "objectives": intent.objectives,
            "curriculum": curriculum,
        });
        let prompt = prompts::build(
            strategy,
            "assessment designer",
            "Write at least one question for every module, keyed by module id. Vary the \
             position of correct multiple-choice answers and mix true and false answers.",
            &inputs,
            ASSESSMENT_SCHEMA,
        );
        self.gateway.call(Stage::Assessment, prompt, cancel).await
    }
}
