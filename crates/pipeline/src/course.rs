//! Course artifacts produced by the generation stages.
//!
//! Model responses are deserialised straight into these types. Variant-bearing
//! data (content blocks, questions) uses internally tagged enums so that a
//! response with an unknown or missing `type` tag is rejected on receipt rather
//! than carried downstream as loosely-typed JSON.

use serde::{Deserialize, Serialize};

use crate::{CourseLevel, LessonId, ModuleId, Stage, UserId};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Inbound request consumed by `generate_course`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseGenerationRequest {
    pub topic: String,
    pub user_id: UserId,
    #[serde(default)]
    pub level: CourseLevel,
    pub duration_minutes: u32,
    #[serde(default)]
    pub objectives: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stage 1: intent
// ---------------------------------------------------------------------------

/// Normalised description of what the course must achieve.
///
/// Immutable once Gate 1 has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseIntent {
    pub topic: String,
    pub level: CourseLevel,
    pub duration_minutes: u32,
    pub objectives: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stage 2: curriculum
// ---------------------------------------------------------------------------

/// Ordered module/lesson outline for a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumStructure {
    pub title: String,
    pub modules: Vec<CurriculumModule>,
}

impl CurriculumStructure {
    /// All lessons in curriculum order, paired with the module that owns them.
    pub fn lessons(&self) -> impl Iterator<Item = (&CurriculumModule, &LessonOutline)> {
        self.modules
            .iter()
            .flat_map(|module| module.lessons.iter().map(move |lesson| (module, lesson)))
    }

    /// Number of lessons across all modules.
    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    /// Looks up a lesson outline by id.
    pub fn lesson(&self, id: &LessonId) -> Option<&LessonOutline> {
        self.lessons().map(|(_, l)| l).find(|l| &l.id == id)
    }
}

/// One module of a curriculum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumModule {
    pub id: ModuleId,
    pub title: String,
    pub lessons: Vec<LessonOutline>,
}

/// One lesson slot within a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonOutline {
    pub id: LessonId,
    pub title: String,
    pub duration_minutes: u32,
    /// Lessons that must be taken before this one.
    #[serde(default)]
    pub prerequisites: Vec<LessonId>,
}

// ---------------------------------------------------------------------------
// Stage 3: content
// ---------------------------------------------------------------------------

/// Authored content for one lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonContent {
    pub lesson_id: LessonId,
    pub blocks: Vec<ContentBlock>,
}

impl LessonContent {
    /// Number of characters of authored text across all blocks.
    pub fn text_len(&self) -> usize {
        self.blocks.iter().map(ContentBlock::text_len).sum()
    }
}

/// A single block of lesson content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        body: String,
    },
    Code {
        language: String,
        source: String,
        #[serde(default)]
        explanation: Option<String>,
    },
    Exercise {
        prompt: String,
        #[serde(default)]
        hints: Vec<String>,
        #[serde(default)]
        solution: Option<String>,
    },
    Media {
        kind: MediaKind,
        url: String,
        #[serde(default)]
        caption: Option<String>,
    },
}

impl ContentBlock {
    /// Characters of learner-facing text carried by this block.
    pub fn text_len(&self) -> usize {
        match self {
            ContentBlock::Text { body } => body.trim().chars().count(),
            ContentBlock::Code {
                source,
                explanation,
                ..
            } => {
                source.trim().chars().count()
                    + explanation.as_deref().map_or(0, |e| e.trim().chars().count())
            }
            ContentBlock::Exercise { prompt, .. } => prompt.trim().chars().count(),
            ContentBlock::Media { caption, .. } => {
                caption.as_deref().map_or(0, |c| c.trim().chars().count())
            }
        }
    }

    /// Variant tag, as serialised.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Code { .. } => "code",
            ContentBlock::Exercise { .. } => "exercise",
            ContentBlock::Media { .. } => "media",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Diagram,
}

// ---------------------------------------------------------------------------
// Stage 4: assessments
// ---------------------------------------------------------------------------

/// Question sets for every module of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAssessments {
    pub modules: Vec<ModuleAssessment>,
}

impl CourseAssessments {
    pub fn for_module(&self, id: &ModuleId) -> Option<&ModuleAssessment> {
        self.modules.iter().find(|m| &m.module_id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAssessment {
    pub module_id: ModuleId,
    pub questions: Vec<Question>,
}

/// A single assessment question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Question {
    MultipleChoice {
        prompt: String,
        options: Vec<String>,
        /// Zero-based index into `options`.
        answer_index: usize,
    },
    TrueFalse {
        prompt: String,
        answer: bool,
    },
    FillBlank {
        prompt: String,
        answer: String,
    },
    Coding {
        prompt: String,
        #[serde(default)]
        starter_code: Option<String>,
        tests: Vec<String>,
    },
}

impl Question {
    pub fn prompt(&self) -> &str {
        match self {
            Question::MultipleChoice { prompt, .. }
            | Question::TrueFalse { prompt, .. }
            | Question::FillBlank { prompt, .. }
            | Question::Coding { prompt, .. } => prompt,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 5: quality review
// ---------------------------------------------------------------------------

/// Severity tag on a [`QualityIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Minor,
    Major,
    /// Blocks completion until resolved.
    Critical,
}

/// A single finding from the quality reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: IssueSeverity,
    pub message: String,
    /// Lesson the finding is about, when it is lesson-specific. Drives targeted
    /// regeneration.
    #[serde(default)]
    pub lesson_id: Option<LessonId>,
    #[serde(default)]
    pub resolved: bool,
}

/// Output of the quality review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall score on a 0–100 scale. Range is enforced by Gate 5, not here.
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<QualityIssue>,
    /// Verdict relative to the configured threshold; set by the orchestrator
    /// after Gate 5 runs, never trusted from the model.
    #[serde(default)]
    pub passed: bool,
}

impl QualityReport {
    /// Lessons named by unresolved issues, de-duplicated, in report order.
    pub fn flagged_lessons(&self) -> Vec<LessonId> {
        let mut flagged: Vec<LessonId> = Vec::new();
        for issue in self.issues.iter().filter(|i| !i.resolved) {
            if let Some(id) = &issue.lesson_id {
                if !flagged.contains(id) {
                    flagged.push(id.clone());
                }
            }
        }
        flagged
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Final artifact of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCourse {
    pub intent: CourseIntent,
    pub curriculum: CurriculumStructure,
    pub lessons: Vec<LessonContent>,
    pub assessments: CourseAssessments,
    pub quality: QualityReport,
}

/// A stage's output, as handed to the job store in one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "artifact", rename_all = "snake_case")]
pub enum StageArtifact {
    Intent(CourseIntent),
    Curriculum(CurriculumStructure),
    Content(Vec<LessonContent>),
    Assessment(CourseAssessments),
    Qa(QualityReport),
}

impl StageArtifact {
    /// The stage that produces this artifact.
    pub fn stage(&self) -> Stage {
        match self {
            StageArtifact::Intent(_) => Stage::Intent,
            StageArtifact::Curriculum(_) => Stage::Curriculum,
            StageArtifact::Content(_) => Stage::Content,
            StageArtifact::Assessment(_) => Stage::Assessment,
            StageArtifact::Qa(_) => Stage::Qa,
        }
    }
}
