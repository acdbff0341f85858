//! Shared fixtures for executor integration tests: a scripted model, recording
//! and failing collaborators, and canned artifacts that pass every gate.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agents::PipelineExecutor;
use async_trait::async_trait;
use pipeline::{
    AttemptRecord, CourseGenerationRequest, CourseLevel, FailureDiagnostics, Job, JobFilter,
    JobId, JobLease, JobStatus, JobStore, LlmClient, LlmError, LlmRequest, Notifier, PipelineConfig, Stage,
    StageArtifact, StageTransition, StoreError, UserId,
};
use serde_json::{json, Value};
use store::InMemoryJobStore;

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// One canned model reply.
pub enum Reply {
    Json(Value),
    Fail(LlmError),
    /// Never answers; only cancellation or a timeout ends the call.
    Hang,
}

/// Fake [`LlmClient`] that answers from per-stage (and per-lesson) queues and
/// falls back to replies that pass every gate.
///
/// Default course shape: 4 modules × 3 lessons, ids `m{m}` / `m{m}-l{l}`.
/// Lesson calls sleep for an id-dependent latency so they finish out of order.
#[derive(Default)]
pub struct ScriptedLlm {
    stage_replies: Mutex<HashMap<Stage, VecDeque<Reply>>>,
    lesson_replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<LlmRequest>>,
    revisions: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, stage: Stage, reply: Reply) {
        self.stage_replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(reply);
    }

    pub fn script_lesson(&self, lesson_id: &str, reply: Reply) {
        self.lesson_replies
            .lock()
            .unwrap()
            .entry(lesson_id.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.stage == stage)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Highest number of lesson calls observed in flight at once.
    pub fn peak_lesson_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_scripted(&self, stage: Stage, lesson: Option<&str>) -> Option<Reply> {
        if let Some(id) = lesson {
            let reply = self
                .lesson_replies
                .lock()
                .unwrap()
                .get_mut(id)
                .and_then(VecDeque::pop_front);
            if reply.is_some() {
                return reply;
            }
        }
        self.stage_replies
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
    }

    fn default_reply(&self, stage: Stage, lesson: Option<&str>) -> Value {
        match stage {
            Stage::Intent => intent_json(),
            Stage::Curriculum => curriculum_json(4, 3),
            Stage::Content => {
                let id = lesson.unwrap_or("unknown");
                let mut revisions = self.revisions.lock().unwrap();
                let revision = revisions.entry(id.to_owned()).or_insert(0);
                *revision += 1;
                lesson_json(id, *revision)
            }
            Stage::Assessment => assessments_json(4),
            Stage::Qa => review_json(85.0, &[]),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, request: LlmRequest) -> Result<Value, LlmError> {
        let stage = request.stage;
        let lesson = match stage {
            Stage::Content => lesson_id_in(&request.prompt),
            _ => None,
        };
        self.requests.lock().unwrap().push(request);

        let _guard = match &lesson {
            Some(id) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                let guard = InFlight(&self.in_flight);
                tokio::time::sleep(latency(id)).await;
                Some(guard)
            }
            None => None,
        };

        let reply = self
            .next_scripted(stage, lesson.as_deref())
            .unwrap_or_else(|| Reply::Json(self.default_reply(stage, lesson.as_deref())));
        match reply {
            Reply::Json(value) => Ok(value),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Reads the lesson id out of a content prompt's JSON inputs.
fn lesson_id_in(prompt: &str) -> Option<String> {
    let marker = "\"lesson_id\": \"";
    let start = prompt.find(marker)? + marker.len();
    let len = prompt[start..].find('"')?;
    Some(prompt[start..start + len].to_owned())
}

/// Later lessons in a module tend to answer first.
fn latency(lesson_id: &str) -> Duration {
    let spread = lesson_id.bytes().map(u64::from).sum::<u64>() % 4;
    Duration::from_millis(5 + (3 - spread) * 7)
}

// ---------------------------------------------------------------------------
// Canned artifacts
// ---------------------------------------------------------------------------

pub fn request() -> CourseGenerationRequest {
    CourseGenerationRequest {
        topic: "Python basics".into(),
        user_id: UserId::new("u-1").unwrap(),
        level: CourseLevel::Beginner,
        duration_minutes: 180,
        objectives: vec!["variables".into(), "loops".into()],
    }
}

pub fn intent_json() -> Value {
    json!({
        "topic": "Python basics",
        "level": "beginner",
        "duration_minutes": 180,
        "objectives": ["variables", "loops"]
    })
}

pub fn lesson_ids(modules: usize, lessons: usize) -> Vec<String> {
    (1..=modules)
        .flat_map(|m| (1..=lessons).map(move |l| format!("m{m}-l{l}")))
        .collect()
}

pub fn curriculum_json(modules: usize, lessons: usize) -> Value {
    let modules: Vec<Value> = (1..=modules)
        .map(|m| {
            let lessons: Vec<Value> = (1..=lessons)
                .map(|l| {
                    let prerequisites: Vec<String> = if l > 1 {
                        vec![format!("m{m}-l{}", l - 1)]
                    } else {
                        Vec::new()
                    };
                    json!({
                        "id": format!("m{m}-l{l}"),
                        "title": format!("Lesson {m}.{l}"),
                        "duration_minutes": 15,
                        "prerequisites": prerequisites
                    })
                })
                .collect();
            json!({ "id": format!("m{m}"), "title": format!("Module {m}"), "lessons": lessons })
        })
        .collect();
    json!({ "title": "Python basics", "modules": modules })
}

pub fn lesson_json(lesson_id: &str, revision: u32) -> Value {
    let body = format!(
        "Revision {revision} of lesson {lesson_id}. {}",
        "Variables name values so later statements can refer to them. ".repeat(5)
    );
    json!({
        "blocks": [
            { "type": "text", "body": body },
            { "type": "code", "language": "python", "source": "total = sum([1, 2, 3])\nprint(total)" }
        ]
    })
}

pub fn assessments_json(modules: usize) -> Value {
    let modules: Vec<Value> = (1..=modules)
        .map(|m| {
            json!({
                "module_id": format!("m{m}"),
                "questions": [
                    {
                        "type": "multiple_choice",
                        "prompt": format!("Which statement about module {m} is true?"),
                        "options": ["first", "second", "third"],
                        "answer_index": m % 3
                    },
                    { "type": "true_false", "prompt": "Python is dynamically typed.", "answer": true }
                ]
            })
        })
        .collect();
    json!({ "modules": modules })
}

pub fn review_json(score: f64, flagged: &[&str]) -> Value {
    let issues: Vec<Value> = flagged
        .iter()
        .map(|id| json!({ "severity": "major", "message": "explanation is too thin", "lesson_id": id }))
        .collect();
    json!({ "score": score, "issues": issues })
}

/// Defaults with back-off shrunk to milliseconds.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        cancel_poll_ms: 10,
        ..PipelineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Notifier that remembers every transition, optionally failing each call.
#[derive(Default)]
pub struct RecordingNotifier {
    transitions: Mutex<Vec<StageTransition>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn transitions(&self) -> Vec<StageTransition> {
        self.transitions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, transition: StageTransition) -> Result<(), String> {
        self.transitions.lock().unwrap().push(transition);
        if self.fail {
            Err("webhook unreachable".into())
        } else {
            Ok(())
        }
    }
}

/// Wraps the in-memory store and fails the next checkpoint commit of one stage.
pub struct FlakyStore {
    inner: InMemoryJobStore,
    fail_commit_of: Mutex<Option<Stage>>,
    tripped: AtomicBool,
}

impl FlakyStore {
    pub fn failing_commit_of(stage: Stage) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            fail_commit_of: Mutex::new(Some(stage)),
            tripped: AtomicBool::new(false),
        }
    }

    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.create_job(job).await
    }

    async fn update_stage(
        &self,
        job_id: JobId,
        stage: Stage,
        artifact: StageArtifact,
        status: JobStatus,
    ) -> Result<Job, StoreError> {
        let fail = {
            let mut target = self.fail_commit_of.lock().unwrap();
            if *target == Some(stage) {
                *target = None;
                true
            } else {
                false
            }
        };
        if fail {
            self.tripped.store(true, Ordering::SeqCst);
            return Err(StoreError::Io {
                message: "disk full".into(),
            });
        }
        self.inner.update_stage(job_id, stage, artifact, status).await
    }

    async fn record_attempt(&self, job_id: JobId, attempt: AttemptRecord) -> Result<Job, StoreError> {
        self.inner.record_attempt(job_id, attempt).await
    }

    async fn begin_stage(&self, job_id: JobId, stage: Stage) -> Result<Job, StoreError> {
        self.inner.begin_stage(job_id, stage).await
    }

    async fn set_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        failure: Option<FailureDiagnostics>,
    ) -> Result<Job, StoreError> {
        self.inner.set_status(job_id, status, failure).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(filter).await
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.delete_job(job_id).await
    }

    async fn acquire_lease(&self, job_id: JobId) -> Result<Option<JobLease>, StoreError> {
        self.inner.acquire_lease(job_id).await
    }

    async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError> {
        self.inner.request_cancel(job_id).await
    }

    async fn cancel_requested(&self, job_id: JobId) -> Result<bool, StoreError> {
        self.inner.cancel_requested(job_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub executor: PipelineExecutor,
    pub llm: Arc<ScriptedLlm>,
    pub store: Arc<dyn JobStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), Arc::new(InMemoryJobStore::new()))
    }

    pub fn with(config: PipelineConfig, store: Arc<dyn JobStore>) -> Self {
        Self::with_notifier(config, store, RecordingNotifier::default())
    }

    pub fn with_notifier(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        notifier: RecordingNotifier,
    ) -> Self {
        let llm = ScriptedLlm::new();
        let notifier = Arc::new(notifier);
        let executor =
            PipelineExecutor::new(config, llm.clone(), store.clone(), notifier.clone()).unwrap();
        Self {
            executor,
            llm,
            store,
            notifier,
        }
    }

    /// Submits the canned request and waits for the job to stop.
    pub async fn run_to_end(&self) -> Job {
        let handle = self.executor.generate_course(request()).await.unwrap();
        self.executor.wait_for(handle.job_id).await.unwrap()
    }
}

/// Polls `condition` every few milliseconds for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
