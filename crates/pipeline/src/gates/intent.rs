//! Gate 1: course intent.

use super::{GateConfig, GateResult, Violation, ViolationCode};
use crate::{CourseGenerationRequest, CourseIntent, Stage};

/// Checks an extracted [`CourseIntent`].
///
/// Rejects a blank topic, a duration outside the configured bounds, an
/// objective count outside `[min_objectives, max_objectives]`, and blank
/// objectives.
pub fn check_intent(intent: &CourseIntent, config: &GateConfig) -> GateResult {
    let mut violations = Vec::new();

    check_topic(&intent.topic, &mut violations);
    check_duration(intent.duration_minutes, config, &mut violations);

    let count = intent.objectives.len();
    if count < config.min_objectives || count > config.max_objectives {
        violations.push(Violation::new(
            ViolationCode::OutOfRange,
            "objectives",
            format!(
                "{count} objectives; expected between {} and {}",
                config.min_objectives, config.max_objectives
            ),
        ));
    }
    check_objectives(&intent.objectives, &mut violations);

    GateResult::new(Stage::Intent, violations)
}

/// Shape check for an inbound request, run before a job is created.
///
/// Same rules as Gate 1, except that a request may omit objectives entirely:
/// the intent extractor derives them from the topic.
pub fn check_request(request: &CourseGenerationRequest, config: &GateConfig) -> GateResult {
    let mut violations = Vec::new();

    check_topic(&request.topic, &mut violations);
    check_duration(request.duration_minutes, config, &mut violations);

    if request.objectives.len() > config.max_objectives {
        violations.push(Violation::new(
            ViolationCode::OutOfRange,
            "objectives",
            format!(
                "{} objectives; at most {} allowed",
                request.objectives.len(),
                config.max_objectives
            ),
        ));
    }
    check_objectives(&request.objectives, &mut violations);

    GateResult::new(Stage::Intent, violations)
}

fn check_topic(topic: &str, violations: &mut Vec<Violation>) {
    if topic.trim().is_empty() {
        violations.push(Violation::new(
            ViolationCode::EmptyField,
            "topic",
            "topic must not be empty",
        ));
    }
}

fn check_duration(minutes: u32, config: &GateConfig, violations: &mut Vec<Violation>) {
    if minutes < config.min_duration_minutes || minutes > config.max_duration_minutes {
        violations.push(Violation::new(
            ViolationCode::OutOfRange,
            "duration_minutes",
            format!(
                "duration {minutes} min outside [{}, {}]",
                config.min_duration_minutes, config.max_duration_minutes
            ),
        ));
    }
}

fn check_objectives(objectives: &[String], violations: &mut Vec<Violation>) {
    for (i, objective) in objectives.iter().enumerate() {
        if objective.trim().is_empty() {
            violations.push(Violation::new(
                ViolationCode::EmptyField,
                format!("objectives[{i}]"),
                "objective must not be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::fixtures;
    use crate::UserId;

    fn intent(objectives: &[&str]) -> CourseIntent {
        CourseIntent {
            topic: "Python basics".into(),
            level: fixtures::level(),
            duration_minutes: 180,
            objectives: objectives.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn two_objectives_pass() {
        let result = check_intent(&intent(&["variables", "loops"]), &GateConfig::default());
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn objective_count_is_bounded() {
        let config = GateConfig::default();
        assert!(!check_intent(&intent(&[]), &config).passed());

        let eleven: Vec<String> = (0..11).map(|i| format!("objective {i}")).collect();
        let many = CourseIntent {
            objectives: eleven,
            ..intent(&[])
        };
        let result = check_intent(&many, &config);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].code, ViolationCode::OutOfRange);
    }

    #[test]
    fn blank_topic_and_bad_duration_are_both_reported() {
        let bad = CourseIntent {
            topic: "  ".into(),
            duration_minutes: 5,
            ..intent(&["loops"])
        };
        let codes: Vec<_> = check_intent(&bad, &GateConfig::default())
            .violations
            .into_iter()
            .map(|v| v.code)
            .collect();
        assert_eq!(codes, vec![ViolationCode::EmptyField, ViolationCode::OutOfRange]);
    }

    #[test]
    fn request_may_omit_objectives() {
        let request = CourseGenerationRequest {
            topic: "Rust ownership".into(),
            user_id: UserId::new("u-1").unwrap(),
            level: fixtures::level(),
            duration_minutes: 120,
            objectives: vec![],
        };
        assert!(check_request(&request, &GateConfig::default()).passed());
    }
}
