//! Bounded worker pool for lesson authoring.
//!
//! Lessons are dispatched in curriculum order into at most `concurrency`
//! concurrent tasks. Each task retries its own lesson independently. Results
//! land in an index-keyed buffer and are released only once every slot is
//! filled, so completion order never leaks into output order.
//!
//! On the first fatal lesson failure the pool stops dispatching, lets the
//! tasks already in flight run to completion, then reports the failure.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    check_lesson, CourseIntent, LessonContent, LessonOutline, PipelineConfig, Stage, StageError,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::prompts::PromptStrategy;
use crate::retry::{Attempt, AttemptRecorder, RetryRunner};
use crate::roles::Agents;

/// State shared by every lesson task of one dispatch.
pub(crate) struct LessonShared {
    pub agents: Arc<Agents>,
    pub config: Arc<PipelineConfig>,
    pub recorder: Arc<dyn AttemptRecorder>,
    pub intent: CourseIntent,
}

/// One lesson to author.
#[derive(Debug, Clone)]
pub(crate) struct LessonWork {
    pub module_title: String,
    pub outline: LessonOutline,
}

struct LessonAttempt<'a> {
    shared: &'a LessonShared,
    work: &'a LessonWork,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl Attempt for LessonAttempt<'_> {
    type Output = LessonContent;

    async fn run(&mut self, _attempt: u32, strategy: PromptStrategy) -> Result<LessonContent, StageError> {
        let gates = &self.shared.config.gates;
        let lesson = self
            .shared
            .agents
            .content
            .write(
                &self.shared.intent,
                &self.work.module_title,
                &self.work.outline,
                gates.min_lesson_chars,
                strategy,
                self.cancel,
            )
            .await?;
        check_lesson(&lesson, gates).into_result()?;
        Ok(lesson)
    }
}

async fn author_one(shared: &LessonShared, work: &LessonWork, cancel: &CancellationToken) -> Result<LessonContent, StageError> {
    let runner = RetryRunner {
        config: &shared.config,
        cancel,
        recorder: shared.recorder.as_ref(),
    };
    let mut unit = LessonAttempt {
        shared,
        work,
        cancel,
    };
    runner
        .run(Stage::Content, Some(&work.outline.id), &mut unit)
        .await
        .map_err(|err| match err {
            StageError::ResourceExhausted { attempts, .. } => StageError::LessonFailed {
                lesson_id: work.outline.id.clone(),
                reason: format!("no valid content after {attempts} attempt(s)"),
            },
            other => other,
        })
}

/// Fixed-size lesson worker pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LessonPool {
    concurrency: usize,
}

impl LessonPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Authors every lesson in `work`, returning them in `work` order.
    pub async fn author(
        &self,
        shared: Arc<LessonShared>,
        work: Vec<LessonWork>,
        cancel: &CancellationToken,
    ) -> Result<Vec<LessonContent>, StageError> {
        let total = work.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        let mut buffer: Vec<Option<LessonContent>> = vec![None; total];
        let mut pending = work.into_iter().enumerate();
        let mut failure: Option<StageError> = None;

        loop {
            // Dispatch while permits are free. Nothing new starts once a lesson
            // has failed or the job is cancelled.
            while failure.is_none() && !cancel.is_cancelled() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let Some((index, item)) = pending.next() else {
                    break;
                };
                debug!(lesson = %item.outline.id, index, "Dispatching lesson");
                let shared = shared.clone();
                let cancel = cancel.clone();
                set.spawn(async move {
                    let _permit = permit;
                    (index, author_one(&shared, &item, &cancel).await)
                });
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            match joined {
                Ok((index, Ok(lesson))) => buffer[index] = Some(lesson),
                Ok((_, Err(err))) => {
                    if failure.is_none() {
                        warn!(error = %err, "Lesson failed; draining in-flight lessons");
                        failure = Some(err);
                    }
                }
                Err(join_err) => {
                    if failure.is_none() {
                        failure = Some(StageError::Provider {
                            message: format!("lesson task aborted: {join_err}"),
                            retry_after: None,
                        });
                    }
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        buffer
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(StageError::Cancelled)
    }
}
