//! Gate 4: assessments.

use std::collections::HashSet;

use super::{GateConfig, GateResult, Violation, ViolationCode};
use crate::{CourseAssessments, CurriculumStructure, ModuleId, Question, Stage};

/// Per module, how many questions of one kind must exist before an all-equal
/// answer key is treated as degenerate.
const DEGENERATE_MIN_QUESTIONS: usize = 3;

/// Checks that every curriculum module has at least one question, that each
/// question is well-formed, and that answer keys are not degenerate.
///
/// `_config` is accepted for signature parity with the other gates; the
/// assessment rules carry no tunable bounds today.
pub fn check_assessments(
    curriculum: &CurriculumStructure,
    assessments: &CourseAssessments,
    _config: &GateConfig,
) -> GateResult {
    let mut violations = Vec::new();

    let known: HashSet<&ModuleId> = curriculum.modules.iter().map(|m| &m.id).collect();
    let mut seen: HashSet<&ModuleId> = HashSet::new();

    for (a, module) in assessments.modules.iter().enumerate() {
        let path = format!("modules[{a}]");
        if !known.contains(&module.module_id) {
            violations.push(Violation::new(
                ViolationCode::UnknownModule,
                &path,
                format!("module '{}' is not in the curriculum", module.module_id),
            ));
        }
        if !seen.insert(&module.module_id) {
            violations.push(Violation::new(
                ViolationCode::DuplicateId,
                &path,
                format!("module '{}' has more than one question set", module.module_id),
            ));
        }

        for (q, question) in module.questions.iter().enumerate() {
            check_question(question, &format!("{path}.questions[{q}]"), &mut violations);
        }
        check_answer_distribution(&module.questions, &path, &mut violations);
    }

    for module in &curriculum.modules {
        let has_questions = assessments
            .modules
            .iter()
            .any(|a| a.module_id == module.id && !a.questions.is_empty());
        if !has_questions {
            violations.push(Violation::new(
                ViolationCode::MissingQuestions,
                "modules",
                format!("module '{}' has no questions", module.id),
            ));
        }
    }

    GateResult::new(Stage::Assessment, violations)
}

fn check_question(question: &Question, path: &str, violations: &mut Vec<Violation>) {
    let mut invalid = |message: String| {
        violations.push(Violation::new(ViolationCode::InvalidQuestion, path, message));
    };

    if question.prompt().trim().is_empty() {
        invalid("prompt must not be empty".into());
    }

    match question {
        Question::MultipleChoice {
            options,
            answer_index,
            ..
        } => {
            if options.iter().any(|o| o.trim().is_empty()) {
                invalid("options must not be empty".into());
            }
            let distinct: HashSet<String> =
                options.iter().map(|o| o.trim().to_lowercase()).collect();
            if distinct.len() < 2 {
                invalid(format!(
                    "needs at least 2 distinct options, found {}",
                    distinct.len()
                ));
            } else if distinct.len() != options.len() {
                invalid("options must be distinct".into());
            }
            if *answer_index >= options.len() {
                invalid(format!(
                    "answer_index {answer_index} out of range for {} options",
                    options.len()
                ));
            }
        }
        Question::TrueFalse { .. } => {}
        Question::FillBlank { answer, .. } => {
            if answer.trim().is_empty() {
                invalid("answer must not be empty".into());
            }
        }
        Question::Coding { tests, .. } => {
            if tests.is_empty() || tests.iter().any(|t| t.trim().is_empty()) {
                invalid("coding questions need at least one non-empty test".into());
            }
        }
    }
}

fn check_answer_distribution(questions: &[Question], path: &str, violations: &mut Vec<Violation>) {
    let choice_keys: Vec<usize> = questions
        .iter()
        .filter_map(|q| match q {
            Question::MultipleChoice { answer_index, .. } => Some(*answer_index),
            _ => None,
        })
        .collect();
    if all_equal(&choice_keys) {
        violations.push(Violation::new(
            ViolationCode::DegenerateAnswers,
            path,
            format!(
                "all {} multiple-choice answers are option {}",
                choice_keys.len(),
                choice_keys[0]
            ),
        ));
    }

    let truth_keys: Vec<bool> = questions
        .iter()
        .filter_map(|q| match q {
            Question::TrueFalse { answer, .. } => Some(*answer),
            _ => None,
        })
        .collect();
    if all_equal(&truth_keys) {
        violations.push(Violation::new(
            ViolationCode::DegenerateAnswers,
            path,
            format!(
                "all {} true/false answers are {}",
                truth_keys.len(),
                truth_keys[0]
            ),
        ));
    }
}

fn all_equal<T: PartialEq>(keys: &[T]) -> bool {
    keys.len() >= DEGENERATE_MIN_QUESTIONS && keys.iter().all(|k| *k == keys[0])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::gates::fixtures::curriculum;
    use crate::ModuleAssessment;

    fn choice(answer_index: usize) -> Question {
        Question::MultipleChoice {
            prompt: "Which keyword defines a function?".into(),
            options: vec!["def".into(), "fun".into(), "fn".into()],
            answer_index,
        }
    }

    fn truth(answer: bool) -> Question {
        Question::TrueFalse {
            prompt: "Lists are mutable.".into(),
            answer,
        }
    }

    fn assessments_for(c: &CurriculumStructure, questions: Vec<Question>) -> CourseAssessments {
        CourseAssessments {
            modules: c
                .modules
                .iter()
                .map(|m| ModuleAssessment {
                    module_id: m.id.clone(),
                    questions: questions.clone(),
                })
                .collect(),
        }
    }

    fn codes(result: &GateResult) -> Vec<ViolationCode> {
        result.violations.iter().map(|v| v.code).collect()
    }

    #[test]
    fn one_question_per_module_passes() {
        let c = curriculum(4, 3);
        let result = check_assessments(&c, &assessments_for(&c, vec![choice(0)]), &GateConfig::default());
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn module_without_questions_fails() {
        let c = curriculum(3, 2);
        let mut a = assessments_for(&c, vec![truth(true)]);
        a.modules[1].questions.clear();
        a.modules.remove(2);
        let result = check_assessments(&c, &a, &GateConfig::default());
        assert_eq!(
            codes(&result),
            vec![ViolationCode::MissingQuestions, ViolationCode::MissingQuestions]
        );
    }

    #[test]
    fn identical_answer_keys_are_degenerate() {
        let c = curriculum(3, 2);
        let a = assessments_for(&c, vec![choice(1), choice(1), choice(1), truth(false)]);
        let result = check_assessments(&c, &a, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::DegenerateAnswers; 3]);

        let varied = assessments_for(&c, vec![choice(1), choice(0), choice(1), truth(false)]);
        assert!(check_assessments(&c, &varied, &GateConfig::default()).passed());
    }

    #[test]
    fn multiple_choice_needs_distinct_options_and_valid_key() {
        let c = curriculum(3, 2);
        let bad = Question::MultipleChoice {
            prompt: "Pick".into(),
            options: vec!["same".into(), "Same ".into()],
            answer_index: 2,
        };
        let a = assessments_for(&c, vec![bad]);
        let result = check_assessments(&c, &a, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::InvalidQuestion; 6]);
    }

    #[test]
    fn unknown_module_is_rejected() {
        let c = curriculum(3, 2);
        let mut a = assessments_for(&c, vec![choice(0)]);
        a.modules.push(ModuleAssessment {
            module_id: ModuleId::new("ghost").unwrap(),
            questions: vec![choice(2)],
        });
        assert_eq!(
            codes(&check_assessments(&c, &a, &GateConfig::default())),
            vec![ViolationCode::UnknownModule]
        );
    }
}
