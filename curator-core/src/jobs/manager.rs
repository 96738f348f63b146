//! Uniform lifecycle for long-running operations.
//!
//! Jobs are persisted rows driven by an in-process worker pool. A
//! submitted job starts PENDING, turns RUNNING when a worker picks it
//! up, and always ends in exactly one terminal state with
//! `completed_at` set. Cancellation is cooperative through a token
//! handed to the job's future.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use curator_model::{Job, JobId, JobStatus, JobType};

use crate::context::AppContext;
use crate::error::{CuratorError, Result};
use crate::jobs::progress::{ProgressBus, ProgressEvent};

const QUEUE_CAPACITY: usize = 64;
/// Minimum spacing between persisted/broadcast progress updates.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub type JobFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type JobFn = Box<dyn FnOnce(JobHandle) -> JobFuture + Send>;

/// Capabilities handed to a running job: throttled progress reporting
/// and the cancellation token.
#[derive(Clone)]
pub struct JobHandle {
    pub job_id: JobId,
    pub cancellation: CancellationToken,
    context: Arc<AppContext>,
    bus: ProgressBus,
    last_report: Arc<std::sync::Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("job_id", &self.job_id).finish()
    }
}

impl JobHandle {
    /// Record progress, throttled to one write per second unless forced.
    pub async fn report(&self, percent: f64, message: &str, force: bool) {
        {
            let Ok(mut last) = self.last_report.lock() else {
                return;
            };
            let now = Instant::now();
            let due = last
                .map(|at| now.duration_since(at) >= PROGRESS_INTERVAL)
                .unwrap_or(true);
            if !force && !due {
                return;
            }
            *last = Some(now);
        }

        if let Err(err) = self
            .context
            .database
            .jobs()
            .update_progress(self.job_id, percent, message)
            .await
        {
            warn!("failed to persist progress for job {}: {err}", self.job_id);
        }
        self.bus.publish(ProgressEvent::JobProgress {
            job_id: self.job_id.to_string(),
            status: JobStatus::Running.as_str().to_string(),
            progress: percent,
            message: Some(message.to_string()),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

struct QueuedJob {
    job_id: JobId,
    work: JobFn,
}

pub struct JobManager {
    context: Arc<AppContext>,
    bus: ProgressBus,
    queue: mpsc::Sender<QueuedJob>,
    running: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager").finish()
    }
}

impl JobManager {
    /// Spin up the worker pool. Workers live for the lifetime of the
    /// process and share one queue.
    pub fn new(context: Arc<AppContext>, bus: ProgressBus) -> Arc<Self> {
        let worker_count = context.settings.jobs.worker_count.max(1);
        let (tx, rx) = mpsc::channel::<QueuedJob>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let manager = Arc::new(Self {
            context,
            bus,
            queue: tx,
            running: Arc::new(Mutex::new(HashMap::new())),
        });

        for worker in 0..worker_count {
            let manager = manager.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let queued = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(queued) = queued else {
                        break;
                    };
                    manager.run_job(queued).await;
                }
                info!("job worker {worker} shutting down");
            });
        }

        manager
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    /// Create a PENDING job row and enqueue its work.
    pub async fn submit(
        &self,
        job_type: JobType,
        metadata: Value,
        work: JobFn,
    ) -> Result<Job> {
        let job = Job::new(job_type, metadata);
        self.context.database.jobs().insert(&job).await?;

        let token = CancellationToken::new();
        self.running.lock().await.insert(job.id, token);

        self.queue
            .send(QueuedJob {
                job_id: job.id,
                work,
            })
            .await
            .map_err(|_| CuratorError::Internal("job queue is closed".into()))?;

        info!("queued {} job {}", job.job_type, job.id);
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.context.database.jobs().get(id).await
    }

    pub async fn list_active(&self) -> Result<Vec<Job>> {
        self.context.database.jobs().list_active().await
    }

    /// Trip the job's cancellation token. The job ends CANCELLED once it
    /// observes the token.
    pub async fn cancel(&self, id: JobId) -> bool {
        match self.running.lock().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_job(&self, queued: QueuedJob) {
        let job_id = queued.job_id;
        let jobs = self.context.database.jobs();

        let token = self
            .running
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default();

        if token.is_cancelled() {
            if let Err(err) = jobs
                .finish(job_id, JobStatus::Cancelled, Some("cancelled before start"), None)
                .await
            {
                error!("failed to finalize job {job_id} as CANCELLED: {err}");
            }
            self.finish_event(job_id, JobStatus::Cancelled).await;
            return;
        }

        if let Err(err) = jobs.mark_running(job_id).await {
            error!("failed to mark job {job_id} running: {err}");
        }

        let handle = JobHandle {
            job_id,
            cancellation: token.clone(),
            context: self.context.clone(),
            bus: self.bus.clone(),
            last_report: Arc::new(std::sync::Mutex::new(None)),
        };

        let outcome = (queued.work)(handle).await;

        let status = match &outcome {
            Ok(_) if token.is_cancelled() => JobStatus::Cancelled,
            Ok(_) => JobStatus::Completed,
            Err(CuratorError::Cancelled(_)) => JobStatus::Cancelled,
            Err(_) => JobStatus::Failed,
        };

        let finished = match &outcome {
            Ok(payload) => jobs.finish(job_id, status, None, Some(payload)).await,
            Err(err) => jobs.finish(job_id, status, Some(&err.to_string()), None).await,
        };
        if let Err(err) = finished {
            error!("failed to finalize job {job_id} as {status}: {err}");
        }

        self.running.lock().await.remove(&job_id);
        self.finish_event(job_id, status).await;

        match status {
            JobStatus::Completed => info!("job {job_id} completed"),
            JobStatus::Cancelled => info!("job {job_id} cancelled"),
            other => warn!("job {job_id} ended {other}"),
        }
    }

    async fn finish_event(&self, job_id: JobId, status: JobStatus) {
        let progress = if status == JobStatus::Completed { 100.0 } else { 0.0 };
        self.bus.publish(ProgressEvent::JobProgress {
            job_id: job_id.to_string(),
            status: status.as_str().to_string(),
            progress,
            message: None,
        });
    }
}
