//! Core domain for CourseForge course generation.
//!
//! This crate contains every domain concept, newtype identifier, course
//! artifact, validation gate, and cross-cutting error type used throughout the
//! pipeline. Infrastructure crates implement the traits defined here; they
//! never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`JobId`, `LessonId`, `ModuleId`, ...) |
//! | [`types`] | Shared value types (`Stage`, `ModelTier`, `TokenCost`, `Timestamp`) |
//! | [`course`] | Requests and stage artifacts (intent, curriculum, lessons, assessments, QA) |
//! | [`gates`] | Pure validation gates, one per stage |
//! | [`job`] | Job record, status state machine, attempt history |
//! | [`routing`] | Stage → tier → model routing and cost estimation |
//! | [`config`] | Runtime tunables with defaults |
//! | [`ports`] | `LlmClient`, `JobStore`, `Notifier` traits |
//! | [`errors`] | Error and retry-policy types |

pub mod config;
pub mod course;
pub mod errors;
pub mod gates;
pub mod identifiers;
pub mod job;
pub mod ports;
pub mod routing;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::PipelineConfig;
pub use course::{
    ContentBlock, CourseAssessments, CourseGenerationRequest, CourseIntent, CurriculumModule,
    CurriculumStructure, GeneratedCourse, IssueSeverity, LessonContent, LessonOutline, MediaKind,
    ModuleAssessment, QualityIssue, QualityReport, Question, StageArtifact,
};
pub use errors::{
    AttemptErrorKind, LlmError, PipelineError, RetryPolicy, StageError, StoreError,
};
pub use gates::{
    check_assessments, check_code_syntax, check_content, check_curriculum, check_intent,
    check_lesson, check_quality, check_request, GateConfig, GateResult, Violation, ViolationCode,
};
pub use identifiers::{JobId, LessonId, ModelId, ModuleId, UserId};
pub use job::{
    AttemptRecord, FailureDiagnostics, Job, JobFilter, JobHandle, JobProgress, JobStatus,
    StageArtifacts,
};
pub use ports::{JobLease, JobStore, LlmClient, LlmRequest, Notifier, StageTransition};
pub use routing::{ModelRouter, RouterConfig, TierSpec};
pub use types::{CourseLevel, ModelTier, Stage, Timestamp, TokenCost};
