use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use pipeline::{
    AttemptRecord, FailureDiagnostics, Job, JobFilter, JobId, JobLease, JobStatus, JobStore,
    Stage, StageArtifact, StoreError,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::transitions;

const JOB_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";
const LOCK_EXTENSION: &str = "lock";
const CANCEL_EXTENSION: &str = "cancel";

/// Directory-backed job store: `<root>/<job_id>.json`, one document per job.
///
/// # Atomicity
///
/// Each mutation is read-modify-write under a store-wide lock, and the write
/// goes to `<job_id>.json.tmp` before being renamed over the live file. A crash
/// mid-write leaves a stray temp file that readers ignore; the live document
/// always holds the last fully committed version. The temp file is synced
/// before the rename and the directory after it.
///
/// # Ownership
///
/// A job's lease is an exclusive advisory lock on `<job_id>.lock`, so two
/// processes sharing the directory never drive the same job. The OS drops the
/// lock when its holder exits, crashed or not. A cancellation request for a
/// job owned elsewhere is the marker file `<job_id>.cancel`.
#[derive(Debug)]
pub struct FileJobStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, "create directory", e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("{job_id}.{JOB_EXTENSION}"))
    }

    fn lock_path(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("{job_id}.{LOCK_EXTENSION}"))
    }

    fn cancel_path(&self, job_id: JobId) -> PathBuf {
        self.root.join(format!("{job_id}.{CANCEL_EXTENSION}"))
    }

    async fn require_job_file(&self, job_id: JobId) -> Result<(), StoreError> {
        let path = self.job_path(job_id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StoreError::NotFound(job_id)),
            Err(e) => Err(io_error(&path, "check", e)),
        }
    }

    async fn clear_cancel_request(&self, job_id: JobId) -> Result<(), StoreError> {
        let path = self.cancel_path(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, "delete", e)),
        }
    }

    async fn read_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        let path = self.job_path(job_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(job_id))
            }
            Err(e) => return Err(io_error(&path, "read", e)),
        };
        parse_job(&path, &content)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn write_job(&self, job: &Job) -> Result<(), StoreError> {
        let path = self.job_path(job.id);
        let content = serde_json::to_string_pretty(job).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;

        let temp_path = self.root.join(format!("{}.{TEMP_EXTENSION}", job.id));
        write_synced(&temp_path, content.as_bytes())
            .await
            .map_err(|e| io_error(&temp_path, "write", e))?;

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(&path, "rename into", e));
        }
        sync_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, "sync", e))
    }

    async fn mutate<F>(&self, job_id: JobId, f: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut job = self.read_job(job_id).await?;
        f(&mut job)?;
        self.write_job(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(self.job_path(job.id))
            .await
            .unwrap_or(false)
        {
            return Err(StoreError::AlreadyExists(job.id));
        }
        self.write_job(job).await
    }

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
        self.read_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, "list", e))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, "list", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOB_EXTENSION) {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                // Deleted between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&path, "read", e)),
            };
            match parse_job(&path, &content) {
                Ok(job) if filter.matches(&job) => jobs.push(job),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job file"),
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(job_id))
            }
            Err(e) => return Err(io_error(&path, "delete", e)),
        }
        self.clear_cancel_request(job_id).await?;
        // The caller still holds the lease; the lock file goes with the job.
        let _ = tokio::fs::remove_file(self.lock_path(job_id)).await;
        Ok(())
    }

    async fn acquire_lease(&self, job_id: JobId) -> Result<Option<JobLease>, StoreError> {
        self.require_job_file(job_id).await?;
        let path = self.lock_path(job_id);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, "open", e))?
            .into_std()
            .await;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                self.clear_cancel_request(job_id).await?;
                debug!(job_id = %job_id, "Job lease acquired");
                Ok(Some(JobLease::new(file)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(io_error(&path, "lock", e)),
        }
    }

    async fn request_cancel(&self, job_id: JobId) -> Result<(), StoreError> {
        self.require_job_file(job_id).await?;
        let path = self.cancel_path(job_id);
        tokio::fs::write(&path, job_id.to_string())
            .await
            .map_err(|e| io_error(&path, "write", e))
    }

    async fn cancel_requested(&self, job_id: JobId) -> Result<bool, StoreError> {
        let path = self.cancel_path(job_id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, "check", e))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Makes a completed rename durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn parse_job(path: &Path, content: &str) -> Result<Job, StoreError> {
    serde_json::from_str(content).map_err(|e| StoreError::Serialization {
        message: format!("{}: {e}", path.display()),
    })
}

fn io_error(path: &Path, action: &str, err: std::io::Error) -> StoreError {
    StoreError::Io {
        message: format!("failed to {action} '{}': {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{CourseGenerationRequest, CourseIntent, CourseLevel, UserId};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn job() -> Job {
        Job::new(CourseGenerationRequest {
            topic: "Linear algebra".into(),
            user_id: UserId::new("u").unwrap(),
            level: CourseLevel::Advanced,
            duration_minutes: 240,
            objectives: vec!["eigenvalues".into()],
        })
    }

    fn intent() -> StageArtifact {
        StageArtifact::Intent(CourseIntent {
            topic: "Linear algebra".into(),
            level: CourseLevel::Advanced,
            duration_minutes: 240,
            objectives: vec!["eigenvalues".into()],
        })
    }

    #[tokio::test]
    async fn committed_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let job = job();
        {
            let store = FileJobStore::open(dir.path()).await.unwrap();
            store.create_job(&job).await.unwrap();
            store
                .update_stage(job.id, Stage::Intent, intent(), JobStatus::IntentDone)
                .await
                .unwrap();
        }

        let reopened = FileJobStore::open(dir.path()).await.unwrap();
        let loaded = reopened.get_job(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::IntentDone);
        assert_eq!(loaded.artifacts.intent, job_intent());
    }

    fn job_intent() -> Option<CourseIntent> {
        match intent() {
            StageArtifact::Intent(i) => Some(i),
            _ => None,
        }
    }

    #[tokio::test]
    async fn stray_temp_file_does_not_affect_reads() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        store.create_job(&job).await.unwrap();

        // Simulates a crash between writing the temp file and renaming it.
        let temp = dir.path().join(format!("{}.{TEMP_EXTENSION}", job.id));
        std::fs::write(&temp, "{\"half\": ").unwrap();

        assert_eq!(store.get_job(job.id).await.unwrap(), job);
        assert_eq!(store.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_transition_does_not_touch_disk() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        store.create_job(&job).await.unwrap();
        let before = std::fs::read_to_string(store.job_path(job.id)).unwrap();

        let result = store
            .update_stage(job.id, Stage::Intent, intent(), JobStatus::QaDone)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(std::fs::read_to_string(store.job_path(job.id)).unwrap(), before);
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped_when_listing() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        store.create_job(&job()).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), "not json").unwrap();

        assert_eq!(store.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn synced_write_replaces_the_document_without_leftovers() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        store.create_job(&job).await.unwrap();
        store
            .update_stage(job.id, Stage::Intent, intent(), JobStatus::IntentDone)
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.{JOB_EXTENSION}", job.id)]);
        let on_disk = std::fs::read_to_string(store.job_path(job.id)).unwrap();
        assert_eq!(parse_job(&store.job_path(job.id), &on_disk).unwrap().status, JobStatus::IntentDone);
    }

    #[tokio::test]
    async fn lease_excludes_another_store_on_the_same_directory() {
        let dir = tempdir().unwrap();
        let first = FileJobStore::open(dir.path()).await.unwrap();
        let second = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        first.create_job(&job).await.unwrap();

        let lease = first.acquire_lease(job.id).await.unwrap();
        assert!(lease.is_some());
        assert!(second.acquire_lease(job.id).await.unwrap().is_none());

        drop(lease);
        assert!(second.acquire_lease(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lease_requires_an_existing_job() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let id = JobId::new_random();
        assert_eq!(store.acquire_lease(id).await.unwrap_err(), StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn cancel_request_crosses_stores_and_clears_on_next_lease() {
        let dir = tempdir().unwrap();
        let owner = FileJobStore::open(dir.path()).await.unwrap();
        let other = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        owner.create_job(&job).await.unwrap();
        let lease = owner.acquire_lease(job.id).await.unwrap().unwrap();

        other.request_cancel(job.id).await.unwrap();
        assert!(owner.cancel_requested(job.id).await.unwrap());
        assert_eq!(owner.list_jobs(&JobFilter::default()).await.unwrap().len(), 1);

        drop(lease);
        let _next = other.acquire_lease(job.id).await.unwrap().unwrap();
        assert!(!owner.cancel_requested(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_the_document() {
        let dir = tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let job = job();
        store.create_job(&job).await.unwrap();
        store.delete_job(job.id).await.unwrap();
        assert_eq!(store.get_job(job.id).await, Err(StoreError::NotFound(job.id)));
    }
}
