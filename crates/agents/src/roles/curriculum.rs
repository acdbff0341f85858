use std::sync::Arc;

use pipeline::{CourseIntent, CurriculumStructure, GateConfig, Stage, StageError};
use tokio_util::sync::CancellationToken;

use crate::gateway::LlmGateway;
use crate::prompts::{self, PromptStrategy, CURRICULUM_SCHEMA};

/// Designs the module and lesson outline for an intent.
pub struct CurriculumArchitect {
    gateway: Arc<LlmGateway>,
}

impl CurriculumArchitect {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn design(
        &self,
        intent: &CourseIntent,
        bounds: &GateConfig,
        strategy: PromptStrategy,
        cancel: &CancellationToken,
    ) -> Result<CurriculumStructure, StageError> {
        let task = format!(
            "Design a curriculum of {}-{} modules with {}-{} lessons each. Lesson ids must be \
             unique across the whole course and titles must not repeat. Prerequisites may only \
             name lessons from this curriculum and must not form a cycle. Lesson durations \
             should add up to roughly the course duration.",
            bounds.min_modules,
            bounds.max_modules,
            bounds.min_lessons_per_module,
            bounds.max_lessons_per_module,
        );
        let prompt = prompts::build(strategy, "curriculum architect", &task, intent, CURRICULUM_SCHEMA);
        self.gateway.call(Stage::Curriculum, prompt, cancel).await
    }
}
