//! Gate 5: quality review.

use super::{GateConfig, GateResult, Violation, ViolationCode};
use crate::{IssueSeverity, QualityReport, Stage};

/// Checks the reviewer's score range, unresolved critical issues and the
/// `qa_min_score` threshold.
pub fn check_quality(report: &QualityReport, config: &GateConfig) -> GateResult {
    let mut violations = Vec::new();

    let in_range = report.score.is_finite() && (0.0..=100.0).contains(&report.score);
    if !in_range {
        violations.push(Violation::new(
            ViolationCode::OutOfRange,
            "score",
            format!("score {} outside [0, 100]", report.score),
        ));
    }

    for (i, issue) in report.issues.iter().enumerate() {
        if issue.severity == IssueSeverity::Critical && !issue.resolved {
            violations.push(Violation::new(
                ViolationCode::CriticalIssue,
                format!("issues[{i}]"),
                format!("unresolved critical issue: {}", issue.message),
            ));
        }
    }

    if in_range && report.score < config.qa_min_score {
        violations.push(Violation::new(
            ViolationCode::BelowThreshold,
            "score",
            format!(
                "score {} below minimum {}",
                report.score, config.qa_min_score
            ),
        ));
    }

    GateResult::new(Stage::Qa, violations)
}
