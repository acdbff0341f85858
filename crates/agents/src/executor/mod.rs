//! The pipeline executor: job lifecycle, stage loop and regeneration.
//!
//! One background task drives each job through its stages. Every mutating
//! operation first claims the job: an entry in this executor's running map
//! plus the store's lease, taken together. The stage loop, regeneration and
//! deletion therefore never interleave on the same job, whether the competing
//! caller lives in this process or in another one sharing the store. Jobs are
//! independent of each other; only the shared [`LlmClient`] (and any limiter
//! wrapped around it) is contended.

mod regenerate;
mod run;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use pipeline::{
    check_request, CourseGenerationRequest, GeneratedCourse, Job, JobFilter, JobHandle, JobId,
    JobLease, JobProgress, JobStatus, JobStore, LlmClient, ModelRouter, Notifier,
    PipelineConfig, PipelineError, Stage, StageTransition, TokenCost,
};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use regenerate::RegenerationReport;

use crate::gateway::LlmGateway;
use crate::pool::LessonPool;
use crate::roles::Agents;

/// A job with a live task (stage loop or regeneration).
struct RunningJob {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Exclusive ownership of one job, held for as long as a task works on it.
/// Give it back with [`Inner::release`].
pub(crate) struct Claim {
    job_id: JobId,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
    lease: JobLease,
}

pub(crate) struct Inner {
    config: Arc<PipelineConfig>,
    store: Arc<dyn JobStore>,
    gateway: Arc<LlmGateway>,
    agents: Arc<Agents>,
    notifier: Arc<dyn Notifier>,
    pool: LessonPool,
    running: Mutex<HashMap<JobId, RunningJob>>,
}

/// Orchestrates course generation jobs.
///
/// Cheap to clone; clones share the same jobs and running tasks.
#[derive(Clone)]
pub struct PipelineExecutor {
    inner: Arc<Inner>,
}

impl PipelineExecutor {
    pub fn new(
        config: PipelineConfig,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let gateway = Arc::new(LlmGateway::new(
            client,
            ModelRouter::new(config.router.clone()),
            config.call_timeout(),
        ));
        let agents = Arc::new(Agents::new(gateway.clone()));
        let pool = LessonPool::new(config.lesson_concurrency);
        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                store,
                gateway,
                agents,
                notifier,
                pool,
                running: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Validates `request`, persists a PENDING job and starts it in the background.
    #[instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn generate_course(
        &self,
        request: CourseGenerationRequest,
    ) -> Result<JobHandle, PipelineError> {
        let verdict = check_request(&request, &self.inner.config.gates);
        if !verdict.passed() {
            return Err(PipelineError::InvalidRequest {
                violations: verdict.violations,
            });
        }

        let job = Job::new(request);
        self.inner
            .store
            .create_job(&job)
            .await
            .map_err(PipelineError::from_store)?;
        info!(job_id = %job.id, "Job accepted");
        let claim = self.inner.claim(job.id).await?;
        self.inner.spawn_run(claim);
        Ok(job_handle(&job))
    }

    /// Continues a persisted job from its last committed checkpoint.
    ///
    /// Committed stages are never re-executed. A COMPLETE job is returned as is.
    /// FAILED and CANCELLED jobs restart at the stage after their checkpoint.
    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: JobId) -> Result<JobHandle, PipelineError> {
        let claim = self.inner.claim(job_id).await?;
        match self.inner.restore(job_id).await {
            Ok(job) if job.status == JobStatus::Complete => {
                self.inner.release(claim).await;
                Ok(job_handle(&job))
            }
            Ok(job) => {
                self.inner.spawn_run(claim);
                Ok(job_handle(&job))
            }
            Err(err) => {
                self.inner.release(claim).await;
                Err(err)
            }
        }
    }

    /// Requests cooperative cancellation.
    ///
    /// A running job stops at its next cancellation point and ends CANCELLED
    /// without persisting any in-flight work. A job owned by another process
    /// gets a cancellation request through the store, which its owner picks
    /// up within `cancel_poll_ms`. A persisted job nobody owns (e.g. left over
    /// from a crash) is marked CANCELLED directly.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), PipelineError> {
        if let Some(running) = self.inner.running.lock().await.get(&job_id) {
            running.cancel.cancel();
            info!("Cancellation requested");
            return Ok(());
        }

        match self.inner.claim(job_id).await {
            Ok(claim) => {
                let result = self.inner.cancel_idle(job_id).await;
                self.inner.release(claim).await;
                result
            }
            Err(PipelineError::JobBusy(_)) => {
                self.inner
                    .store
                    .request_cancel(job_id)
                    .await
                    .map_err(PipelineError::from_store)?;
                info!("Job is owned elsewhere; cancellation request recorded");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_job_status(&self, job_id: JobId) -> Result<JobProgress, PipelineError> {
        Ok(self.inner.load(job_id).await?.progress())
    }

    /// The finished course of a COMPLETE job.
    pub async fn get_result(&self, job_id: JobId) -> Result<GeneratedCourse, PipelineError> {
        let job = self.inner.load(job_id).await?;
        let wrong_status = || PipelineError::WrongStatus {
            job_id,
            status: job.status,
            required: "COMPLETE",
        };
        if job.status != JobStatus::Complete {
            return Err(wrong_status());
        }
        job.course().ok_or_else(wrong_status)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job, PipelineError> {
        self.inner.load(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, PipelineError> {
        Ok(self.inner.store.list_jobs(filter).await?)
    }

    /// Removes a job that is not running.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), PipelineError> {
        let claim = self.inner.claim(job_id).await?;
        let result = self
            .inner
            .store
            .delete_job(job_id)
            .await
            .map_err(PipelineError::from_store);
        self.inner.release(claim).await;
        result?;
        info!("Job deleted");
        Ok(())
    }

    /// Router estimate for a stored job: recorded attempts for completed
    /// stages, planned calls for the rest.
    pub async fn estimate_cost(&self, job_id: JobId) -> Result<TokenCost, PipelineError> {
        let job = self.inner.load(job_id).await?;
        Ok(self.inner.gateway.router().estimate_cost(&job))
    }

    /// Resumes every persisted job that is neither terminal nor running.
    ///
    /// Meant for process start, after a crash left jobs mid-pipeline. Jobs
    /// another process is driving are skipped.
    pub async fn recover_incomplete(&self) -> Result<Vec<JobHandle>, PipelineError> {
        let filter = JobFilter {
            active_only: true,
            ..JobFilter::default()
        };
        let mut handles = Vec::new();
        for job in self.inner.store.list_jobs(&filter).await? {
            match self.resume_job(job.id).await {
                Ok(handle) => handles.push(handle),
                Err(PipelineError::JobBusy(_)) => {
                    debug!(job_id = %job.id, "Job is owned elsewhere; not recovering")
                }
                Err(err) => warn!(job_id = %job.id, error = %err, "Could not recover job"),
            }
        }
        Ok(handles)
    }

    /// Waits until no task of this executor is running for `job_id`, then
    /// returns the job.
    pub async fn wait_for(&self, job_id: JobId) -> Result<Job, PipelineError> {
        let done = self
            .inner
            .running
            .lock()
            .await
            .get(&job_id)
            .map(|r| r.done.clone());
        if let Some(mut done) = done {
            // A dropped sender also means the task is gone.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.inner.load(job_id).await
    }
}

fn job_handle(job: &Job) -> JobHandle {
    JobHandle {
        job_id: job.id,
        status: job.status,
    }
}

impl Inner {
    async fn load(&self, job_id: JobId) -> Result<Job, PipelineError> {
        self.store
            .get_job(job_id)
            .await
            .map_err(PipelineError::from_store)
    }

    /// Takes ownership of a job nobody is working on. The running-map entry
    /// and the store lease are taken under one lock, so a concurrent
    /// [`PipelineExecutor::cancel_job`] always finds the job either free or
    /// running.
    async fn claim(&self, job_id: JobId) -> Result<Claim, PipelineError> {
        let mut running = self.running.lock().await;
        if running.contains_key(&job_id) {
            return Err(PipelineError::JobBusy(job_id));
        }
        let lease = self
            .store
            .acquire_lease(job_id)
            .await
            .map_err(PipelineError::from_store)?
            .ok_or(PipelineError::JobBusy(job_id))?;

        let cancel = CancellationToken::new();
        let (done, done_rx) = watch::channel(false);
        running.insert(
            job_id,
            RunningJob {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        Ok(Claim {
            job_id,
            cancel,
            done,
            lease,
        })
    }

    /// Gives a job back: the lease first, then the running entry, then wakes
    /// anyone in [`PipelineExecutor::wait_for`].
    async fn release(&self, claim: Claim) {
        let Claim {
            job_id, done, lease, ..
        } = claim;
        drop(lease);
        self.running.lock().await.remove(&job_id);
        let _ = done.send(true);
    }

    /// Puts a FAILED or CANCELLED job back at its checkpoint; any other job
    /// is returned as stored.
    async fn restore(&self, job_id: JobId) -> Result<Job, PipelineError> {
        let job = self.load(job_id).await?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Ok(job);
        }
        let restored = self
            .store
            .set_status(job_id, job.checkpoint, None)
            .await?;
        info!(from = %job.status, to = %restored.status, "Job restored to checkpoint");
        Ok(restored)
    }

    /// Marks a claimed, idle job CANCELLED.
    async fn cancel_idle(&self, job_id: JobId) -> Result<(), PipelineError> {
        let job = self.load(job_id).await?;
        match job.status {
            JobStatus::Cancelled => Ok(()),
            status if status.is_terminal() => Err(PipelineError::WrongStatus {
                job_id,
                status,
                required: "a job that has not finished",
            }),
            status => {
                self.store
                    .set_status(job_id, JobStatus::Cancelled, None)
                    .await?;
                self.notify(job_id, status, JobStatus::Cancelled, job.current_stage);
                Ok(())
            }
        }
    }

    /// Runs `work` to completion while honouring cancellation requests that
    /// arrive through the store.
    async fn watched<T>(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
        work: impl Future<Output = T>,
    ) -> T {
        tokio::pin!(work);
        tokio::select! {
            out = &mut work => out,
            () = self.watch_cancel_requests(job_id, cancel) => work.await,
        }
    }

    /// Returns once `cancel` fires, firing it first if the store reports a
    /// cancellation request for the job.
    async fn watch_cancel_requests(&self, job_id: JobId, cancel: &CancellationToken) {
        let mut ticks = tokio::time::interval(self.config.cancel_poll());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticks.tick() => {}
            }
            match self.store.cancel_requested(job_id).await {
                Ok(true) => {
                    info!(job_id = %job_id, "Cancellation requested through the store");
                    cancel.cancel();
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(job_id = %job_id, error = %err, "Could not check for a cancellation request")
                }
            }
        }
    }

    /// Fire-and-forget transition notification.
    fn notify(&self, job_id: JobId, from: JobStatus, to: JobStatus, stage: Option<Stage>) {
        let notifier = self.notifier.clone();
        let transition = StageTransition {
            job_id,
            from,
            to,
            stage,
        };
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(transition).await {
                warn!(job_id = %job_id, error = %err, "Notifier failed; job continues");
            }
        });
    }
}
