//! Shared value types for the course generation domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (costs are non-negative, stages have a
//! fixed order) and participate in domain computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One phase of the generation pipeline.
///
/// Variants are declared in execution order; `Ord` follows that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Turn the raw request into a validated [`crate::CourseIntent`].
    Intent,
    /// Design the module/lesson structure.
    Curriculum,
    /// Author per-lesson content blocks.
    Content,
    /// Design per-module question sets.
    Assessment,
    /// Review the assembled course and score it.
    Qa,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Intent,
        Stage::Curriculum,
        Stage::Content,
        Stage::Assessment,
        Stage::Qa,
    ];

    /// Returns the stage that runs after this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Intent => Some(Stage::Curriculum),
            Stage::Curriculum => Some(Stage::Content),
            Stage::Content => Some(Stage::Assessment),
            Stage::Assessment => Some(Stage::Qa),
            Stage::Qa => None,
        }
    }

    /// Short stable name used in logs, file names and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intent => "intent",
            Stage::Curriculum => "curriculum",
            Stage::Content => "content",
            Stage::Assessment => "assessment",
            Stage::Qa => "qa",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Model tiers
// ---------------------------------------------------------------------------

/// Cost/quality class of generative model assigned to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Highest quality, highest cost. Used where a bad answer poisons every later stage.
    Premium,
    /// Cheaper bulk generation.
    Standard,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Premium => f.write_str("premium"),
            ModelTier::Standard => f.write_str("standard"),
        }
    }
}

// ---------------------------------------------------------------------------
// Course level
// ---------------------------------------------------------------------------

/// Target learner proficiency for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl std::str::FromStr for CourseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(CourseLevel::Beginner),
            "intermediate" => Ok(CourseLevel::Intermediate),
            "advanced" => Ok(CourseLevel::Advanced),
            other => Err(format!("unknown course level '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Monetary cost of model usage, expressed in US dollars.
///
/// Produced by the model router's cost estimation. Callers are responsible for
/// rounding to suitable display precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TokenCost(f64);

impl TokenCost {
    /// Creates a [`TokenCost`] from a raw float value (USD).
    ///
    /// Returns `None` if `value` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`TokenCost`] of exactly zero.
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the underlying `f64` value (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Cost of `calls` calls at this per-call price.
    pub fn times(self, calls: u32) -> Self {
        Self(self.0 * f64::from(calls))
    }
}

impl std::fmt::Display for TokenCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.4}", self.0)
    }
}

impl std::ops::Add for TokenCost {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for TokenCost {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for TokenCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
