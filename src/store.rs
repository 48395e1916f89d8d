//! Job registry and on-disk layout.
//!
//! Jobs live in an in-memory map keyed by [`JobId`]; their files live under
//! `<data_dir>/uploads/<job_id>/` and their outputs under
//! `<data_dir>/output/<job_id>/`. A job's result is written exactly once
//! and is read-only afterwards (`Arc<JobResult>`).
//!
//! [`JobStore::begin_processing`] is the guard that keeps a job from being
//! processed twice: the status check and the `created → processing`
//! transition happen under one write lock.

use crate::error::BatchError;
use crate::job::{Job, JobId, JobStatus};
use crate::output::JobResult;
use crate::progress::{JobProgress, ProgressSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// What the caller of [`JobStore::begin_processing`] should do next.
#[derive(Debug)]
pub enum ProcessTicket {
    /// The job moved to `processing`; the caller owns the run.
    Start { job: Job, progress: Arc<JobProgress> },
    /// Another run is in flight; wait for it.
    Wait(watch::Receiver<JobStatus>),
    /// Already completed; nothing to do.
    Done(Arc<JobResult>),
}

/// Status and progress of one job, as served by `GET /api/status/{job_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    #[serde(flatten)]
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobEntry {
    job: Job,
    result: Option<Arc<JobResult>>,
    failure: Option<String>,
    progress: Arc<JobProgress>,
    status_tx: watch::Sender<JobStatus>,
}

impl JobEntry {
    fn set_status(&mut self, status: JobStatus) {
        self.job.status = status;
        self.status_tx.send_replace(status);
    }
}

/// In-memory registry of jobs plus their storage directories.
pub struct JobStore {
    uploads_dir: PathBuf,
    output_dir: PathBuf,
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("uploads_dir", &self.uploads_dir)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

/// Parse a job id from request input; anything malformed is simply unknown.
pub fn parse_job_id(raw: &str) -> Result<JobId, BatchError> {
    raw.parse()
        .map_err(|_| BatchError::JobNotFound(raw.to_string()))
}

impl JobStore {
    pub fn new(uploads_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            output_dir: output_dir.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn job_upload_dir(&self, id: JobId) -> PathBuf {
        self.uploads_dir.join(id.to_string())
    }

    pub fn job_output_dir(&self, id: JobId) -> PathBuf {
        self.output_dir.join(id.to_string())
    }

    /// Register a freshly uploaded job.
    pub async fn insert(&self, job: Job) {
        let (status_tx, _) = watch::channel(job.status);
        let id = job.id;
        self.jobs.write().await.insert(
            id,
            JobEntry {
                job,
                result: None,
                failure: None,
                progress: Arc::new(JobProgress::new()),
                status_tx,
            },
        );
        debug!("Registered job {}", id);
    }

    /// Claim a job for processing, or learn why not.
    pub async fn begin_processing(&self, id: JobId) -> Result<ProcessTicket, BatchError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| BatchError::JobNotFound(id.to_string()))?;

        match entry.job.status {
            JobStatus::Created => {
                entry.set_status(JobStatus::Processing);
                info!("Job {} → processing ({} files)", id, entry.job.files.len());
                Ok(ProcessTicket::Start {
                    job: entry.job.clone(),
                    progress: Arc::clone(&entry.progress),
                })
            }
            JobStatus::Processing => {
                debug!("Job {} already processing; caller will wait", id);
                Ok(ProcessTicket::Wait(entry.status_tx.subscribe()))
            }
            JobStatus::Completed => match &entry.result {
                Some(result) => Ok(ProcessTicket::Done(Arc::clone(result))),
                None => Err(BatchError::Internal(format!(
                    "job {id} is completed but has no result"
                ))),
            },
            JobStatus::Failed => Err(BatchError::JobFailed {
                job_id: id.to_string(),
                reason: entry.failure.clone().unwrap_or_default(),
            }),
        }
    }

    /// Store the result and move the job to `completed`.
    pub async fn complete(&self, id: JobId, result: JobResult) -> Result<Arc<JobResult>, BatchError> {
        let result = Arc::new(result);
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| BatchError::JobNotFound(id.to_string()))?;
        entry.result = Some(Arc::clone(&result));
        entry.set_status(JobStatus::Completed);
        info!(
            "Job {} → completed: {}/{} files succeeded, {} tokens",
            id, result.success, result.total, result.total_tokens
        );
        Ok(result)
    }

    /// Move the job to `failed`.
    pub async fn fail(&self, id: JobId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(entry) => {
                warn!("Job {} → failed: {}", id, reason);
                entry.failure = Some(reason);
                entry.set_status(JobStatus::Failed);
            }
            None => warn!("Cannot mark unknown job {} as failed", id),
        }
    }

    /// The result of a completed job.
    pub async fn result(&self, id: JobId) -> Result<Arc<JobResult>, BatchError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| BatchError::JobNotFound(id.to_string()))?;
        match (entry.job.status, &entry.result) {
            (JobStatus::Completed, Some(result)) => Ok(Arc::clone(result)),
            (JobStatus::Failed, _) => Err(BatchError::JobFailed {
                job_id: id.to_string(),
                reason: entry.failure.clone().unwrap_or_default(),
            }),
            (status, _) => Err(BatchError::JobNotReady {
                job_id: id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Wait until an in-flight run settles, then return its result.
    pub async fn wait_for_result(
        &self,
        id: JobId,
        mut rx: watch::Receiver<JobStatus>,
    ) -> Result<Arc<JobResult>, BatchError> {
        rx.wait_for(JobStatus::is_terminal)
            .await
            .map_err(|_| BatchError::Internal(format!("job {id} was dropped while waiting")))?;
        self.result(id).await
    }

    /// Evict a settled job from memory. Its directories on disk are untouched.
    ///
    /// A job that is still processing is kept: its run needs the entry.
    pub async fn remove(&self, id: JobId) -> Result<(), BatchError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| BatchError::JobNotFound(id.to_string()))?;
        if entry.job.status == JobStatus::Processing {
            return Err(BatchError::JobNotReady {
                job_id: id.to_string(),
                status: entry.job.status.to_string(),
            });
        }
        jobs.remove(&id);
        debug!("Evicted job {}", id);
        Ok(())
    }

    pub async fn status(&self, id: JobId) -> Result<JobStatusReport, BatchError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&id)
            .ok_or_else(|| BatchError::JobNotFound(id.to_string()))?;
        Ok(JobStatusReport {
            job_id: id,
            status: entry.job.status,
            created_at: entry.job.created_at,
            file_count: entry.job.files.len(),
            progress: entry.progress.snapshot(),
            error: entry.failure.clone(),
        })
    }

    /// Write the per-file Markdown outputs and `summary.json` for a result.
    pub async fn write_outputs(&self, result: &JobResult) -> Result<PathBuf, BatchError> {
        let dir = self.job_output_dir(result.job_id);
        for file in result.successes() {
            if let Some(doc) = file.markdown_document() {
                write_atomic(&dir.join(file.output_name()), doc.as_bytes()).await?;
            }
        }
        let summary = serde_json::to_vec_pretty(result)
            .map_err(|e| BatchError::Internal(format!("serialise summary: {e}")))?;
        write_atomic(&dir.join("summary.json"), &summary).await?;
        debug!("Wrote outputs for job {} to {}", result.job_id, dir.display());
        Ok(dir)
    }
}

/// Write a file atomically: temp file in the same directory, then rename.
///
/// Readers never observe a half-written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| BatchError::Internal(format!("Write task panicked: {}", e)))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| BatchError::storage(parent, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| BatchError::storage(parent, e))?;
    tmp.write_all(bytes)
        .map_err(|e| BatchError::storage(path, e))?;
    tmp.persist(path)
        .map_err(|e| BatchError::storage(path, e.error))?;
    Ok(())
}
