use std::sync::Arc;

use pipeline::{CourseGenerationRequest, CourseIntent, Stage, StageError};
use tokio_util::sync::CancellationToken;

use crate::gateway::LlmGateway;
use crate::prompts::{self, PromptStrategy, INTENT_SCHEMA};

/// Turns a raw request into a normalised [`CourseIntent`].
pub struct IntentExtractor {
    gateway: Arc<LlmGateway>,
}

impl IntentExtractor {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn extract(
        &self,
        request: &CourseGenerationRequest,
        strategy: PromptStrategy,
        cancel: &CancellationToken,
    ) -> Result<CourseIntent, StageError> {
        let inputs = serde_json::json!({
            "topic": request.topic,
            "level": request.level,
            "duration_minutes": request.duration_minutes,
            "objectives": request.objectives,
        });
        let prompt = prompts::build(
            strategy,
            "course intent analyst",
            "Restate the request as a precise course intent. Keep the topic and level, \
             keep the duration unless it is unrealistic, and turn the objectives into \
             between one and ten concrete, measurable learning objectives.",
            &inputs,
            INTENT_SCHEMA,
        );
        self.gateway.call(Stage::Intent, prompt, cancel).await
    }
}
