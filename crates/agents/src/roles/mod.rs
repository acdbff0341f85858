//! The five generation agents.
//!
//! Each agent wraps exactly one model call per attempt: it assembles a prompt
//! for the requested [`PromptStrategy`](crate::prompts::PromptStrategy), sends
//! it through the [`LlmGateway`](crate::gateway::LlmGateway), and returns a
//! typed artifact. Agents do not validate, retry, or persist; the executor
//! does that around them.

mod assessment;
mod content;
mod curriculum;
mod intent;
mod quality;

use std::sync::Arc;

pub use assessment::AssessmentDesigner;
pub use content::ContentAuthor;
pub use curriculum::CurriculumArchitect;
pub use intent::IntentExtractor;
pub use quality::{CourseDraft, QualityReviewer};

use crate::gateway::LlmGateway;

/// All agents, sharing one gateway.
pub struct Agents {
    pub intent: IntentExtractor,
    pub curriculum: CurriculumArchitect,
    pub content: ContentAuthor,
    pub assessment: AssessmentDesigner,
    pub quality: QualityReviewer,
}

impl Agents {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self {
            intent: IntentExtractor::new(gateway.clone()),
            curriculum: CurriculumArchitect::new(gateway.clone()),
            content: ContentAuthor::new(gateway.clone()),
            assessment: AssessmentDesigner::new(gateway.clone()),
            quality: QualityReviewer::new(gateway),
        }
    }
}
