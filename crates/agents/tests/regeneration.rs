//! Component and lesson regeneration on committed jobs.

mod support;

use pipeline::{JobStatus, LessonId, PipelineError, Stage, StageError};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{curriculum_json, request, review_json, Harness, Reply};

fn lesson_text(job: &pipeline::Job, id: &str) -> String {
    let lesson = job
        .artifacts
        .content
        .as_ref()
        .unwrap()
        .iter()
        .find(|l| l.lesson_id.as_str() == id)
        .unwrap();
    format!("{:?}", lesson.blocks)
}

#[tokio::test]
async fn test_regenerating_assessments_replaces_only_that_artifact() {
    let h = Harness::new();
    let before = h.run_to_end().await;
    let modules: Vec<_> = (1..=4)
        .map(|m| {
            json!({
                "module_id": format!("m{m}"),
                "questions": [{ "type": "fill_blank", "prompt": "Regenerated: a ___ names a value", "answer": "variable" }]
            })
        })
        .collect();
    h.llm
        .script(Stage::Assessment, Reply::Json(json!({ "modules": modules })));

    let report = h
        .executor
        .regenerate_component(before.id, Stage::Assessment)
        .await
        .unwrap();
    let after = h.executor.get_job(before.id).await.unwrap();

    assert_eq!(report.stage, Stage::Assessment);
    assert_eq!(report.gates.len(), 1);
    assert!(report.all_passed());
    assert_eq!(after.status, JobStatus::Complete);
    assert_ne!(after.artifacts.assessments, before.artifacts.assessments);
    assert!(format!("{:?}", after.artifacts.assessments).contains("Regenerated"));
    assert_eq!(after.artifacts.content, before.artifacts.content);
    assert_eq!(after.artifacts.quality, before.artifacts.quality);
}

#[tokio::test]
async fn test_regenerated_curriculum_reports_broken_dependents_without_cascading() {
    let h = Harness::new();
    let before = h.run_to_end().await;
    h.llm
        .script(Stage::Curriculum, Reply::Json(curriculum_json(3, 2)));

    let report = h
        .executor
        .regenerate_component(before.id, Stage::Curriculum)
        .await
        .unwrap();
    let after = h.executor.get_job(before.id).await.unwrap();

    let stages: Vec<Stage> = report.gates.iter().map(|g| g.stage).collect();
    assert_eq!(stages, vec![Stage::Curriculum, Stage::Content, Stage::Assessment]);
    assert!(report.gates[0].passed());
    assert!(!report.gates[1].passed());
    assert!(!report.gates[2].passed());
    assert!(!report.all_passed());

    assert_eq!(after.status, JobStatus::Complete);
    assert_eq!(after.artifacts.curriculum.as_ref().unwrap().modules.len(), 3);
    assert_eq!(after.artifacts.content, before.artifacts.content);
    assert_eq!(h.llm.calls(Stage::Content), 12);
}

#[tokio::test]
async fn test_regenerating_content_rewrites_every_lesson() {
    let h = Harness::new();
    let before = h.run_to_end().await;

    let report = h
        .executor
        .regenerate_component(before.id, Stage::Content)
        .await
        .unwrap();
    let after = h.executor.get_job(before.id).await.unwrap();

    assert_eq!(report.lessons.len(), 12);
    assert!(report.all_passed());
    assert_eq!(h.llm.calls(Stage::Content), 24);
    assert!(lesson_text(&after, "m4-l3").contains("Revision 2"));
    assert_eq!(after.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_regenerating_quality_review_recomputes_verdict() {
    let h = Harness::new();
    let before = h.run_to_end().await;
    h.llm.script(Stage::Qa, Reply::Json(review_json(93.0, &[])));

    let report = h
        .executor
        .regenerate_component(before.id, Stage::Qa)
        .await
        .unwrap();
    let after = h.executor.get_job(before.id).await.unwrap();

    assert!(report.all_passed());
    let quality = after.artifacts.quality.unwrap();
    assert_eq!(quality.score, 93.0);
    assert!(quality.passed);
}

#[tokio::test]
async fn test_exhausted_regeneration_keeps_previous_artifact() {
    let h = Harness::new();
    let before = h.run_to_end().await;
    for _ in 0..4 {
        h.llm.script(
            Stage::Assessment,
            Reply::Json(json!({ "modules": [{ "module_id": "m9", "questions": [] }] })),
        );
    }

    let err = h
        .executor
        .regenerate_component(before.id, Stage::Assessment)
        .await
        .unwrap_err();
    let after = h.executor.get_job(before.id).await.unwrap();

    assert!(matches!(
        err,
        PipelineError::Stage(StageError::ResourceExhausted {
            stage: Stage::Assessment,
            attempts: 4
        })
    ));
    assert_eq!(after.artifacts.assessments, before.artifacts.assessments);
    assert_eq!(after.status, JobStatus::Complete);
    assert_eq!(after.retry_count(Stage::Assessment), 4);
}

#[tokio::test]
async fn test_regenerating_stage_that_never_committed_is_refused() {
    let h = Harness::new();
    for _ in 0..4 {
        h.llm
            .script(Stage::Curriculum, Reply::Json(curriculum_json(1, 1)));
    }
    let failed = h.run_to_end().await;
    assert_eq!(failed.status, JobStatus::Failed);

    let err = h
        .executor
        .regenerate_component(failed.id, Stage::Content)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::StageNotReady {
            stage: Stage::Content,
            ..
        }
    ));
}

#[tokio::test]
async fn test_regenerating_named_lessons_leaves_others_untouched() {
    let h = Harness::new();
    let before = h.run_to_end().await;
    let target = LessonId::new("m1-l2").unwrap();

    let report = h
        .executor
        .regenerate_lessons(before.id, &[target.clone()])
        .await
        .unwrap();
    let after = h.executor.get_job(before.id).await.unwrap();

    assert_eq!(report.lessons, vec![target]);
    assert!(report.all_passed());
    assert_eq!(h.llm.calls(Stage::Content), 13);
    assert!(lesson_text(&after, "m1-l2").contains("Revision 2"));
    assert!(lesson_text(&after, "m1-l1").contains("Revision 1"));
    let order: Vec<String> = after
        .artifacts
        .content
        .unwrap()
        .iter()
        .map(|l| l.lesson_id.to_string())
        .collect();
    assert_eq!(order, support::lesson_ids(4, 3));
}

#[tokio::test]
async fn test_regenerating_unknown_or_no_lessons_is_rejected() {
    let h = Harness::new();
    let job = h.run_to_end().await;

    let unknown = h
        .executor
        .regenerate_lessons(job.id, &[LessonId::new("m7-l1").unwrap()])
        .await
        .unwrap_err();
    let empty = h.executor.regenerate_lessons(job.id, &[]).await.unwrap_err();

    assert!(matches!(unknown, PipelineError::UnknownLesson(id) if id.as_str() == "m7-l1"));
    assert!(matches!(empty, PipelineError::InvalidRequest { .. }));
    assert_eq!(h.llm.calls(Stage::Content), 12);
}

#[tokio::test]
async fn test_regeneration_is_refused_while_job_runs() {
    let h = Harness::new();
    h.llm.script(Stage::Curriculum, Reply::Hang);
    let handle = h.executor.generate_course(request()).await.unwrap();

    let err = h
        .executor
        .regenerate_component(handle.job_id, Stage::Intent)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::JobBusy(_)));
    h.executor.cancel_job(handle.job_id).await.unwrap();
    h.executor.wait_for(handle.job_id).await.unwrap();
}
