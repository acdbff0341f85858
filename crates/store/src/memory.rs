use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline::{
    AttemptRecord, FailureDiagnostics, Job, JobFilter, JobId, JobLease, JobStatus, JobStore,
    Stage, StageArtifact, StoreError,
};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::transitions;

/// Process-local job store.
///
/// Mutations take the write lock for their whole validate-then-apply step, so
/// each call is atomic with respect to every other call. Leases and
/// cancellation requests are shared by every executor holding the same store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    ownership: Arc<Mutex<Ownership>>,
}

#[derive(Debug, Default)]
struct Ownership {
    leased: HashSet<JobId>,
    cancel_requests: HashSet<JobId>,
}

/// Returns its job to the free set on drop.
struct MemoryLease {
    ownership: Arc<Mutex<Ownership>>,
    job_id: JobId,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if let Ok(mut ownership) = self.ownership.lock() {
            ownership.leased.remove(&self.job_id);
        }
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<F>(&self, job_id: JobId, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        // Apply to a copy so a rejected mutation cannot leave partial state.
        let mut next = job.clone();
        f(&mut next)?;
        *job = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    #[instrument(skip(self, artifact))]
    async fn update_stage(
        &self,
        job_id: JobId,
        stage: Stage,
        artifact: StageArtifact,
        status: JobStatus,
    ) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            transitions::apply_stage(job, stage, artifact, status)
        })
        .await
    }

    #[instrument(skip(self, attempt))]
    async fn record_attempt(&self, job_id: JobId, attempt: AttemptRecord) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            transitions::apply_attempt(job, attempt);
            Ok(())
        })
        .await
    }

    async fn begin_stage(&self, job_id: JobId, stage: Stage) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| {
            transitions::apply_begin(job, stage);
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, failure))]
    async fn set_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        failure: Option<FailureDiagnostics>,
    ) -> Result<Job, StoreError> {
        self.mutate(job_id, |job| transitions::apply_status(job, status, failure))
            .await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError> {
        self.jobs
            .write()
            .await
            .remove(&job_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(job_id))?;
        if let Ok(mut ownership) = self.ownership.lock() {
            ownership.cancel_requests.remove(&job_id);
        }
        Ok(())
    }

    async fn acquire_lease(&self, job_id: JobId) -> Result<Option<JobLease>, StoreError> {
        if !self.jobs.read().await.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id));
        }
        let Ok(mut ownership) = self.ownership.lock() else {
            return Ok(None);
        };
        if !ownership.leased.insert(job_id) {
            return Ok(None);
        }
        ownership.cancel_requests.remove(&job_id);
        Ok(Some(JobLease::new(MemoryLease {
            ownership: self.ownership.clone(),
            job_id,
        })))
    }

    async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError> {
        if !self.jobs.read().await.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id));
        }
        if let Ok(mut ownership) = self.ownership.lock() {
            ownership.cancel_requests.insert(job_id);
        }
        Ok(())
    }

    async fn cancel_requested(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self
            .ownership
            .lock()
            .map(|ownership| ownership.cancel_requests.contains(&job_id))
            .unwrap_or(false))
    }
}
