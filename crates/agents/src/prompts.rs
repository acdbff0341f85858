//! Prompt assembly and fallback-prompt variants.
//!
//! Every agent has the same ordered list of [`PromptStrategy`] variants. The
//! first attempt at a unit of work uses the first variant; each retry moves one
//! step down the list and stays on the last variant once the list runs out.
//! The wording itself is deliberately plain: prompt engineering is not what
//! this crate is about.

use serde::Serialize;

/// One complete model prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub body: String,
    /// Human-readable shape of the JSON the reply must contain.
    pub schema: &'static str,
}

/// How a prompt is framed. Later variants trade richness for reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    /// Full context and guidance.
    Standard,
    /// Same content, with the previous failure modes spelled out as rules.
    Strict,
    /// Bare minimum: inputs and schema only.
    Minimal,
}

impl PromptStrategy {
    pub const ALL: [PromptStrategy; 3] = [
        PromptStrategy::Standard,
        PromptStrategy::Strict,
        PromptStrategy::Minimal,
    ];

    /// Variant index for zero-based `attempt`.
    pub fn index_for_attempt(attempt: u32) -> usize {
        (attempt as usize).min(Self::ALL.len() - 1)
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    fn preamble(self) -> &'static str {
        match self {
            PromptStrategy::Standard => {
                "You are an experienced instructional designer. Think about the learner, then answer."
            }
            PromptStrategy::Strict => {
                "You are an instructional designer. Your previous answer was rejected. \
                 Follow every rule exactly: output only JSON, fill every required field, \
                 respect every count and length limit, and never invent identifiers that \
                 were not given to you."
            }
            PromptStrategy::Minimal => "Return only the JSON document described below.",
        }
    }
}

/// Builds a prompt from a role description, a task and its JSON inputs.
pub(crate) fn build<I: Serialize>(
    strategy: PromptStrategy,
    role: &str,
    task: &str,
    inputs: &I,
    schema: &'static str,
) -> Prompt {
    let inputs = serde_json::to_string_pretty(inputs).unwrap_or_else(|_| "{}".to_owned());
    let body = match strategy {
        PromptStrategy::Minimal => format!("{task}\n\nInputs:\n{inputs}"),
        PromptStrategy::Standard | PromptStrategy::Strict => {
            format!("Role: {role}\n\nTask: {task}\n\nInputs:\n{inputs}")
        }
    };
    Prompt {
        system: strategy.preamble().to_owned(),
        body,
        schema,
    }
}

pub(crate) const INTENT_SCHEMA: &str =
    r#"{"topic": string, "level": "beginner"|"intermediate"|"advanced", "duration_minutes": integer, "objectives": [string]}"#;

pub(crate) const CURRICULUM_SCHEMA: &str = r#"{"title": string, "modules": [{"id": string, "title": string, "lessons": [{"id": string, "title": string, "duration_minutes": integer, "prerequisites": [lesson id]}]}]}"#;

pub(crate) const LESSON_SCHEMA: &str = r#"{"blocks": [{"type": "text", "body": string} | {"type": "code", "language": string, "source": string, "explanation": string?} | {"type": "exercise", "prompt": string, "hints": [string], "solution": string?} | {"type": "media", "kind": "image"|"video"|"diagram", "url": string, "caption": string?}]}"#;

pub(crate) const ASSESSMENT_SCHEMA: &str = r#"{"modules": [{"module_id": string, "questions": [{"type": "multiple_choice", "prompt": string, "options": [string], "answer_index": integer} | {"type": "true_false", "prompt": string, "answer": bool} | {"type": "fill_blank", "prompt": string, "answer": string} | {"type": "coding", "prompt": string, "starter_code": string?, "tests": [string]}]}]}"#;

pub(crate) const REVIEW_SCHEMA: &str = r#"{"score": number 0-100, "issues": [{"severity": "info"|"minor"|"major"|"critical", "message": string, "lesson_id": string?}]}"#;
