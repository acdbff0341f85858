use std::sync::Arc;

use pipeline::{ContentBlock, CourseIntent, LessonContent, LessonOutline, Stage, StageError};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::gateway::LlmGateway;
use crate::prompts::{self, PromptStrategy, LESSON_SCHEMA};

/// Authors the content blocks of one lesson.
pub struct ContentAuthor {
    gateway: Arc<LlmGateway>,
}

/// Model reply for one lesson. The lesson id comes from the outline, never
/// from the model.
#[derive(Debug, Deserialize)]
struct LessonDraft {
    blocks: Vec<ContentBlock>,
}

impl ContentAuthor {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn write(
        &self,
        intent: &CourseIntent,
        module_title: &str,
        outline: &LessonOutline,
        min_chars: usize,
        strategy: PromptStrategy,
        cancel: &CancellationToken,
    ) -> Result<LessonContent, StageError> {
        let inputs = serde_json::json!({
            "course_topic": intent.topic,
            "level": intent.level,
            "module": module_title,
            "lesson_id": outline.id,
            "lesson_title": outline.title,
            "duration_minutes": outline.duration_minutes,
            "prerequisites": outline.prerequisites,
        });
        let task = format!(
            "Write the lesson as an ordered list of content blocks. Use at least {min_chars} \
             characters of explanatory text. Code blocks must be complete and syntactically \
             valid. Media blocks need an absolute URL."
        );
        let prompt = prompts::build(strategy, "lesson author", &task, &inputs, LESSON_SCHEMA);
        let draft: LessonDraft = self.gateway.call(Stage::Content, prompt, cancel).await?;
        Ok(LessonContent {
            lesson_id: outline.id.clone(),
            blocks: draft.blocks,
        })
    }
}
