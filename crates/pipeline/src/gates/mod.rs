//! Deterministic validation gates run after each generation stage.
//!
//! Gates are pure functions of an artifact and a [`GateConfig`]: they never
//! mutate state, never perform I/O and never consult a clock or random source.
//! The same artifact therefore always produces the same [`GateResult`], which is
//! what lets the executor's retry behaviour be tested without a real model.
//!
//! | Gate | Function | Artifact |
//! |------|----------|----------|
//! | 1 | [`check_intent`] | [`crate::CourseIntent`] |
//! | 2 | [`check_curriculum`] | [`crate::CurriculumStructure`] |
//! | 3 | [`check_content`] / [`check_lesson`] | [`crate::LessonContent`] |
//! | 4 | [`check_assessments`] | [`crate::CourseAssessments`] |
//! | 5 | [`check_quality`] | [`crate::QualityReport`] |

mod assessment;
mod content;
mod curriculum;
mod intent;
mod quality;

pub use assessment::check_assessments;
pub use content::{check_code_syntax, check_content, check_lesson};
pub use curriculum::check_curriculum;
pub use intent::{check_intent, check_request};
pub use quality::check_quality;

use serde::{Deserialize, Serialize};

use crate::{Stage, StageError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounds enforced by the gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub min_objectives: usize,
    pub max_objectives: usize,
    pub min_modules: usize,
    pub max_modules: usize,
    pub min_lessons_per_module: usize,
    pub max_lessons_per_module: usize,
    /// Minimum characters of authored text per lesson.
    pub min_lesson_chars: usize,
    /// Minimum QA score (0–100) for a course to pass review.
    pub qa_min_score: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: 15,
            max_duration_minutes: 2400,
            min_objectives: 1,
            max_objectives: 10,
            min_modules: 3,
            max_modules: 12,
            min_lessons_per_module: 2,
            max_lessons_per_module: 7,
            min_lesson_chars: 200,
            qa_min_score: 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Machine-readable category of a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    EmptyField,
    OutOfRange,
    DuplicateId,
    DuplicateTitle,
    UnknownReference,
    PrerequisiteCycle,
    MissingLesson,
    UnexpectedLesson,
    LessonOrder,
    InvalidBlock,
    MalformedCode,
    ContentTooShort,
    MissingQuestions,
    UnknownModule,
    InvalidQuestion,
    DegenerateAnswers,
    CriticalIssue,
    BelowThreshold,
}

/// One reason a gate rejected an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    /// Location within the artifact, e.g. `modules[2].lessons[0]`.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(code: ViolationCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Verdict of one gate: passed when `violations` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub stage: Stage,
    /// Ordered as discovered; stable for a given artifact.
    pub violations: Vec<Violation>,
}

impl GateResult {
    pub fn new(stage: Stage, violations: Vec<Violation>) -> Self {
        Self { stage, violations }
    }

    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Converts a failed verdict into the retryable stage error.
    pub fn into_result(self) -> Result<(), StageError> {
        if self.passed() {
            Ok(())
        } else {
            Err(StageError::ValidationFailure {
                stage: self.stage,
                violations: self.violations,
            })
        }
    }
}

/// Normalises a title for duplicate detection.
fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Artifacts shared by the gate tests.

    use crate::{
        ContentBlock, CourseLevel, CurriculumModule, CurriculumStructure, LessonContent, LessonId,
        LessonOutline, ModuleId,
    };

    pub fn lesson_id(m: usize, l: usize) -> LessonId {
        LessonId::new(format!("m{m}-l{l}")).unwrap()
    }

    /// `modules` × `lessons` curriculum with sequential prerequisites inside each module.
    pub fn curriculum(modules: usize, lessons: usize) -> CurriculumStructure {
        CurriculumStructure {
            title: "Python basics".into(),
            modules: (0..modules)
                .map(|m| CurriculumModule {
                    id: ModuleId::new(format!("m{m}")).unwrap(),
                    title: format!("Module {m}"),
                    lessons: (0..lessons)
                        .map(|l| LessonOutline {
                            id: lesson_id(m, l),
                            title: format!("Lesson {m}.{l}"),
                            duration_minutes: 15,
                            prerequisites: if l == 0 { vec![] } else { vec![lesson_id(m, l - 1)] },
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn lesson(id: LessonId) -> LessonContent {
        LessonContent {
            lesson_id: id,
            blocks: vec![
                ContentBlock::Text {
                    body: "Variables name values so later code can refer to them. ".repeat(4),
                },
                ContentBlock::Code {
                    language: "python".into(),
                    source: "def greet(name):\n    return f\"hi {name}\"\n".into(),
                    explanation: Some("A function returning a formatted string.".into()),
                },
            ],
        }
    }

    pub fn lessons_for(curriculum: &CurriculumStructure) -> Vec<LessonContent> {
        curriculum.lessons().map(|(_, l)| lesson(l.id.clone())).collect()
    }

    pub fn level() -> CourseLevel {
        CourseLevel::Beginner
    }
}
