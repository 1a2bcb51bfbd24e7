//! Background ingestion jobs.
//!
//! The pipeline depends on a three-operation contract only:
//! [`JobDispatcher::enqueue`], [`JobDispatcher::status`] and
//! [`JobDispatcher::cancel`]. [`LocalDispatcher`] fulfils it inside the
//! process with one tokio task per job. Jobs for different sources run in
//! parallel; each run is sequential inside.
//!
//! Cancelling sets the job's [`CancelFlag`], which the run polls between
//! pages and batches. A job that outlives its timeout is dropped where it
//! stands and its source is marked `failed`; a correction checkpoint written
//! before that point stays valid for the next run.
//!
//! Finished jobs stay queryable until [`DEFAULT_FINISHED_JOBS_KEPT`] newer
//! jobs have finished; older ones are forgotten and report as unknown.
//! Task handles of finished jobs are released on the next enqueue.

use crate::cancel::{CancelFlag, Outcome};
use crate::error::IngestError;
use crate::ingest::{IngestMode, IngestReport, Ingestor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type JobId = u64;

/// Default deadline for one ingestion job. Long correction runs on big
/// books take tens of minutes.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Finished jobs whose status is still kept.
pub const DEFAULT_FINISHED_JOBS_KEPT: usize = 256;

/// One ingestion run to schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_id: i64,
    pub mode: IngestMode,
    /// Falls back to the dispatcher's default.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { report: IngestReport },
    Cancelled { report: IngestReport },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Enqueue, inspect and cancel ingestion jobs.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, IngestError>;

    /// `None` for an unknown id.
    async fn status(&self, job_id: JobId) -> Option<JobStatus>;

    /// Request cancellation. `false` for an unknown or finished job.
    async fn cancel(&self, job_id: JobId) -> bool;
}

struct JobEntry {
    status: JobStatus,
    cancel: CancelFlag,
}

struct Jobs {
    entries: HashMap<JobId, JobEntry>,
    /// Finished ids, oldest first.
    finished: VecDeque<JobId>,
    keep_finished: usize,
}

type JobTable = Arc<Mutex<Jobs>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_status(jobs: &JobTable, job_id: JobId, status: JobStatus) {
    let mut jobs = lock(jobs);
    let finished = status.is_finished();
    let Some(entry) = jobs.entries.get_mut(&job_id) else {
        return;
    };
    let was_finished = entry.status.is_finished();
    entry.status = status;
    if finished && !was_finished {
        jobs.finished.push_back(job_id);
        while jobs.finished.len() > jobs.keep_finished {
            if let Some(old) = jobs.finished.pop_front() {
                jobs.entries.remove(&old);
                debug!("Job {} forgotten", old);
            }
        }
    }
}

/// In-process [`JobDispatcher`] on the tokio runtime.
pub struct LocalDispatcher {
    ingestor: Ingestor,
    default_timeout: Duration,
    next_id: AtomicU64,
    jobs: JobTable,
    handles: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl LocalDispatcher {
    pub fn new(ingestor: Ingestor) -> Self {
        Self {
            ingestor,
            default_timeout: DEFAULT_JOB_TIMEOUT,
            next_id: AtomicU64::new(1),
            jobs: Arc::new(Mutex::new(Jobs {
                entries: HashMap::new(),
                finished: VecDeque::new(),
                keep_finished: DEFAULT_FINISHED_JOBS_KEPT,
            })),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// How many finished jobs stay queryable. At least one is kept.
    pub fn with_finished_jobs_kept(self, n: usize) -> Self {
        lock(&self.jobs).keep_finished = n.max(1);
        self
    }

    /// Wait for a job to finish and return its final status.
    pub async fn wait(&self, job_id: JobId) -> Option<JobStatus> {
        let handle = lock(&self.handles).remove(&job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Job {} task ended abnormally: {}", job_id, e);
                set_status(&self.jobs, job_id, JobStatus::Failed { error: e.to_string() });
            }
        }
        self.status(job_id).await
    }
}

#[async_trait]
impl JobDispatcher for LocalDispatcher {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, IngestError> {
        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelFlag::new();
        lock(&self.handles).retain(|_, handle| !handle.is_finished());
        lock(&self.jobs).entries.insert(
            job_id,
            JobEntry {
                status: JobStatus::Queued,
                cancel: cancel.clone(),
            },
        );

        let ingestor = self.ingestor.clone();
        let jobs = Arc::clone(&self.jobs);
        let deadline = request.timeout.unwrap_or(self.default_timeout);
        info!(
            "Job {} queued: source {} in mode '{}' (timeout {:?})",
            job_id, request.source_id, request.mode, deadline
        );

        let handle = tokio::spawn(async move {
            set_status(&jobs, job_id, JobStatus::Running);
            let run = ingestor.run(request.source_id, request.mode, &cancel);
            let status = match tokio::time::timeout(deadline, run).await {
                Ok(Ok(Outcome::Completed(report))) => JobStatus::Completed { report },
                Ok(Ok(Outcome::Cancelled(report))) => JobStatus::Cancelled { report },
                Ok(Err(e)) => JobStatus::Failed { error: e.to_string() },
                Err(_) => {
                    let e = IngestError::JobTimeout {
                        job_id,
                        secs: deadline.as_secs(),
                    };
                    warn!("{}", e);
                    if let Err(store_err) = ingestor.store().fail_source(request.source_id, &e.to_string()) {
                        warn!("Job {}: could not mark source failed — {}", job_id, store_err);
                    }
                    JobStatus::Failed { error: e.to_string() }
                }
            };
            info!("Job {} finished: {}", job_id, status_label(&status));
            set_status(&jobs, job_id, status);
        });
        lock(&self.handles).insert(job_id, handle);
        Ok(job_id)
    }

    async fn status(&self, job_id: JobId) -> Option<JobStatus> {
        lock(&self.jobs).entries.get(&job_id).map(|e| e.status.clone())
    }

    async fn cancel(&self, job_id: JobId) -> bool {
        match lock(&self.jobs).entries.get(&job_id) {
            Some(entry) if !entry.status.is_finished() => {
                entry.cancel.cancel();
                info!("Job {}: cancellation requested", job_id);
                true
            }
            _ => false,
        }
    }
}

fn status_label(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Completed { .. } => "completed",
        JobStatus::Cancelled { .. } => "cancelled",
        JobStatus::Failed { .. } => "failed",
    }
}
