//! Gate 2: curriculum structure.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::{title_key, GateConfig, GateResult, Violation, ViolationCode};
use crate::{CurriculumStructure, LessonId, Stage};

/// Checks module/lesson counts, id and title uniqueness, prerequisite
/// references, and that the prerequisite graph is acyclic.
pub fn check_curriculum(curriculum: &CurriculumStructure, config: &GateConfig) -> GateResult {
    let mut violations = Vec::new();

    let modules = curriculum.modules.len();
    if modules < config.min_modules || modules > config.max_modules {
        violations.push(Violation::new(
            ViolationCode::OutOfRange,
            "modules",
            format!(
                "{modules} modules; expected between {} and {}",
                config.min_modules, config.max_modules
            ),
        ));
    }

    let mut module_ids = HashSet::new();
    let mut module_titles = HashSet::new();
    let mut lesson_ids = HashSet::new();
    let mut lesson_titles = HashSet::new();

    for (m, module) in curriculum.modules.iter().enumerate() {
        let path = format!("modules[{m}]");

        if module.id.as_str().trim().is_empty() {
            violations.push(Violation::new(
                ViolationCode::EmptyField,
                format!("{path}.id"),
                "module id must not be blank",
            ));
        } else if !module_ids.insert(&module.id) {
            violations.push(Violation::new(
                ViolationCode::DuplicateId,
                format!("{path}.id"),
                format!("module id '{}' is used more than once", module.id),
            ));
        }
        if module.title.trim().is_empty() {
            violations.push(Violation::new(
                ViolationCode::EmptyField,
                format!("{path}.title"),
                "module title must not be empty",
            ));
        } else if !module_titles.insert(title_key(&module.title)) {
            violations.push(Violation::new(
                ViolationCode::DuplicateTitle,
                format!("{path}.title"),
                format!("module title '{}' is used more than once", module.title),
            ));
        }

        let lessons = module.lessons.len();
        if lessons < config.min_lessons_per_module || lessons > config.max_lessons_per_module {
            violations.push(Violation::new(
                ViolationCode::OutOfRange,
                format!("{path}.lessons"),
                format!(
                    "{lessons} lessons; expected between {} and {}",
                    config.min_lessons_per_module, config.max_lessons_per_module
                ),
            ));
        }

        for (l, lesson) in module.lessons.iter().enumerate() {
            let path = format!("{path}.lessons[{l}]");
            if lesson.id.as_str().trim().is_empty() {
                violations.push(Violation::new(
                    ViolationCode::EmptyField,
                    format!("{path}.id"),
                    "lesson id must not be blank",
                ));
            } else if !lesson_ids.insert(&lesson.id) {
                violations.push(Violation::new(
                    ViolationCode::DuplicateId,
                    format!("{path}.id"),
                    format!("lesson id '{}' is used more than once", lesson.id),
                ));
            }
            if lesson.title.trim().is_empty() {
                violations.push(Violation::new(
                    ViolationCode::EmptyField,
                    format!("{path}.title"),
                    "lesson title must not be empty",
                ));
            } else if !lesson_titles.insert(title_key(&lesson.title)) {
                violations.push(Violation::new(
                    ViolationCode::DuplicateTitle,
                    format!("{path}.title"),
                    format!("lesson title '{}' is used more than once", lesson.title),
                ));
            }
            if lesson.duration_minutes == 0 {
                violations.push(Violation::new(
                    ViolationCode::OutOfRange,
                    format!("{path}.duration_minutes"),
                    "lesson duration must be positive",
                ));
            }
        }
    }

    // Prerequisite references, then cycles over the references that resolve.
    let mut graph: BTreeMap<&LessonId, Vec<&LessonId>> = BTreeMap::new();
    for (m, module) in curriculum.modules.iter().enumerate() {
        for (l, lesson) in module.lessons.iter().enumerate() {
            let edges = graph.entry(&lesson.id).or_default();
            for prereq in &lesson.prerequisites {
                if lesson_ids.contains(prereq) {
                    edges.push(prereq);
                } else {
                    violations.push(Violation::new(
                        ViolationCode::UnknownReference,
                        format!("modules[{m}].lessons[{l}].prerequisites"),
                        format!("prerequisite '{prereq}' is not a lesson in this curriculum"),
                    ));
                }
            }
        }
    }
    if let Some(cycle) = find_cycle(&graph) {
        let rendered: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
        violations.push(Violation::new(
            ViolationCode::PrerequisiteCycle,
            "prerequisites",
            format!("prerequisite cycle: {}", rendered.join(" -> ")),
        ));
    }

    GateResult::new(Stage::Curriculum, violations)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over the prerequisite graph. Returns the first cycle
/// found, closed (first id repeated at the end). `BTreeMap` iteration keeps the
/// reported cycle stable for a given curriculum.
fn find_cycle<'a>(graph: &BTreeMap<&'a LessonId, Vec<&'a LessonId>>) -> Option<Vec<&'a LessonId>> {
    let mut marks: HashMap<&LessonId, Mark> = HashMap::new();
    let mut stack: Vec<&LessonId> = Vec::new();

    fn visit<'a>(
        node: &'a LessonId,
        graph: &BTreeMap<&'a LessonId, Vec<&'a LessonId>>,
        marks: &mut HashMap<&'a LessonId, Mark>,
        stack: &mut Vec<&'a LessonId>,
    ) -> Option<Vec<&'a LessonId>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        for &next in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(cycle) = visit(next, graph, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for &node in graph.keys() {
        if let Some(cycle) = visit(node, graph, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::fixtures::{curriculum, lesson_id};

    fn codes(result: &GateResult) -> Vec<ViolationCode> {
        result.violations.iter().map(|v| v.code).collect()
    }

    #[test]
    fn four_by_three_passes() {
        let result = check_curriculum(&curriculum(4, 3), &GateConfig::default());
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn two_modules_is_below_minimum() {
        let result = check_curriculum(&curriculum(2, 3), &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::OutOfRange]);
        assert_eq!(result.violations[0].path, "modules");
    }

    #[test]
    fn lessons_per_module_are_bounded() {
        let result = check_curriculum(&curriculum(3, 8), &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::OutOfRange; 3]);
    }

    #[test]
    fn duplicate_lesson_ids_and_titles_are_rejected() {
        let mut c = curriculum(3, 2);
        c.modules[1].lessons[0].id = lesson_id(0, 0);
        c.modules[2].lessons[1].title = "lesson 0.1".into();
        let result = check_curriculum(&c, &GateConfig::default());
        assert!(codes(&result).contains(&ViolationCode::DuplicateId));
        assert!(codes(&result).contains(&ViolationCode::DuplicateTitle));
    }

    #[test]
    fn blank_ids_from_model_output_are_rejected() {
        let mut raw = serde_json::to_value(curriculum(3, 2)).unwrap();
        raw["modules"][1]["id"] = "  ".into();
        raw["modules"][2]["lessons"][1]["id"] = "   ".into();
        let c: CurriculumStructure = serde_json::from_value(raw).unwrap();

        let result = check_curriculum(&c, &GateConfig::default());
        let blank: Vec<&str> = result
            .violations
            .iter()
            .filter(|v| v.code == ViolationCode::EmptyField)
            .map(|v| v.path.as_str())
            .collect();
        assert_eq!(blank, vec!["modules[1].id", "modules[2].lessons[1].id"]);
        assert!(!result.passed());
    }

    #[test]
    fn prerequisite_cycle_is_reported_once() {
        let mut c = curriculum(3, 3);
        // m0-l0 -> m0-l2 -> m0-l1 -> m0-l0
        c.modules[0].lessons[0].prerequisites = vec![lesson_id(0, 2)];
        let result = check_curriculum(&c, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::PrerequisiteCycle]);
        assert!(result.violations[0].message.contains("m0-l0"));
    }

    #[test]
    fn self_prerequisite_is_a_cycle() {
        let mut c = curriculum(3, 2);
        c.modules[2].lessons[1].prerequisites.push(lesson_id(2, 1));
        let result = check_curriculum(&c, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::PrerequisiteCycle]);
    }

    #[test]
    fn unknown_prerequisite_is_rejected() {
        let mut c = curriculum(3, 2);
        c.modules[0].lessons[1].prerequisites = vec![LessonId::new("ghost").unwrap()];
        let result = check_curriculum(&c, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::UnknownReference]);
    }

    #[test]
    fn verdict_is_deterministic() {
        let mut c = curriculum(2, 9);
        c.modules[0].lessons[0].prerequisites = vec![lesson_id(0, 3)];
        c.modules[0].lessons[3].prerequisites = vec![lesson_id(0, 0)];
        let config = GateConfig::default();
        let first = check_curriculum(&c, &config);
        for _ in 0..10 {
            assert_eq!(check_curriculum(&c, &config), first);
        }
    }
}
