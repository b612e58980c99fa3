//! In-process keyed work queue
//!
//! At most one job per key is waiting or running at any time: enqueueing a key that is
//! already in flight hands back the existing [`JobHandle`]. Ingestion jobs share a lane
//! with a single permit so passes never overlap; channel backfills run on their own
//! unbounded lane, deduplicated per channel key.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Result;

/// Queue errors surfaced to callers waiting on a job
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Job {key} failed: {reason}")]
    JobFailed { key: String, reason: String },

    #[error("Queue workers already started")]
    AlreadyStarted,

    #[error("Job {key} was dropped before finishing")]
    Dropped { key: String },
}

/// Concurrency lane of a job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Global concurrency 1
    Ingestion,
    /// Unbounded, one job per key
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    Feed,
    FetchVideo,
    YoutubeDatetime,
    YoutubeUpcoming,
    StreamChannelInfo,
    DailySweep,
    FetchYoutubeChannel { channel_id: String },
    FetchTwitchChannel { channel_id: String },
}

impl JobKind {
    /// Deduplication key
    pub fn key(&self) -> String {
        match self {
            Self::Feed => "feed".to_string(),
            Self::FetchVideo => "fetch-video".to_string(),
            Self::YoutubeDatetime => "yt-dt".to_string(),
            Self::YoutubeUpcoming => "yt-upcoming".to_string(),
            Self::StreamChannelInfo => "tw-channel-info".to_string(),
            Self::DailySweep => "daily-sweep".to_string(),
            Self::FetchYoutubeChannel { channel_id } => format!("fetch-yt:{}", channel_id),
            Self::FetchTwitchChannel { channel_id } => format!("fetch-tw:{}", channel_id),
        }
    }

    pub fn lane(&self) -> Lane {
        match self {
            Self::FetchYoutubeChannel { .. } | Self::FetchTwitchChannel { .. } => Lane::Backfill,
            _ => Lane::Ingestion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Retry and stall-detection settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// An attempt without a heartbeat for this long is considered stalled
    pub stall_window: Duration,
    /// Stalled attempts requeued before the job fails
    pub max_stalled: u32,
    /// Ordinary failures retried before the job fails
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stall_window: Duration::from_secs(120),
            max_stalled: 1,
            max_retries: 0,
        }
    }
}

/// Something that can report liveness during long work
pub trait Progress: Send + Sync {
    fn tick(&self);
}

impl Progress for () {
    fn tick(&self) {}
}

/// Per-attempt context handed to the job handler
pub struct JobContext {
    pub job_id: String,
    pub key: String,
    /// 1-based attempt number
    pub attempt: u32,
    progress: watch::Sender<u64>,
}

impl JobContext {
    /// Report progress, resetting the stall window
    pub fn heartbeat(&self) {
        self.progress.send_modify(|beats| *beats += 1);
    }
}

impl Progress for JobContext {
    fn tick(&self) {
        self.heartbeat();
    }
}

/// Executes queued jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, kind: &JobKind, ctx: &JobContext) -> Result<()>;
}

/// Handle to a waiting or running job
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub key: String,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    pub fn is_same_job(&self, other: &JobHandle) -> bool {
        self.id == other.id
    }

    /// Wait until the job completes or fails
    pub async fn finished(&self) -> std::result::Result<(), QueueError> {
        let mut state = self.state.clone();
        loop {
            match state.borrow_and_update().clone() {
                JobState::Completed => return Ok(()),
                JobState::Failed(reason) => {
                    return Err(QueueError::JobFailed {
                        key: self.key.clone(),
                        reason,
                    })
                }
                JobState::Waiting | JobState::Active => {}
            }

            if state.changed().await.is_err() {
                return match state.borrow().clone() {
                    JobState::Completed => Ok(()),
                    JobState::Failed(reason) => Err(QueueError::JobFailed {
                        key: self.key.clone(),
                        reason,
                    }),
                    _ => Err(QueueError::Dropped {
                        key: self.key.clone(),
                    }),
                };
            }
        }
    }
}

struct QueuedJob {
    id: String,
    key: String,
    kind: JobKind,
    state: watch::Sender<JobState>,
}

enum Attempt {
    Done(Result<()>),
    Stalled,
}

struct QueueInner {
    config: QueueConfig,
    in_flight: Mutex<HashMap<String, JobHandle>>,
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    ingestion_lane: Arc<Semaphore>,
}

/// Keyed job queue
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                config,
                in_flight: Mutex::new(HashMap::new()),
                sender,
                receiver: Mutex::new(Some(receiver)),
                ingestion_lane: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    /// Queue a job, or return the handle of the job already in flight for its key
    pub async fn enqueue(&self, kind: JobKind) -> JobHandle {
        let key = kind.key();
        let mut in_flight = self.inner.in_flight.lock().await;

        if let Some(existing) = in_flight.get(&key) {
            if !existing.state().is_terminal() {
                debug!(key = %key, job_id = %existing.id, "Job already in flight");
                return existing.clone();
            }
        }

        let (state_tx, state_rx) = watch::channel(JobState::Waiting);
        let handle = JobHandle {
            id: Uuid::new_v4().to_string(),
            key: key.clone(),
            state: state_rx,
        };

        let job = QueuedJob {
            id: handle.id.clone(),
            key: key.clone(),
            kind,
            state: state_tx,
        };

        if let Err(mpsc::error::SendError(job)) = self.inner.sender.send(job) {
            error!(key = %key, "Queue receiver is gone, job cannot run");
            job.state
                .send_replace(JobState::Failed("queue is not running".to_string()));
            return handle;
        }

        debug!(key = %key, job_id = %handle.id, "Job enqueued");
        in_flight.insert(key, handle.clone());
        handle
    }

    /// Handle of the job in flight for `key`, if any
    pub async fn lookup(&self, key: &str) -> Option<JobHandle> {
        self.inner
            .in_flight
            .lock()
            .await
            .get(key)
            .filter(|h| !h.state().is_terminal())
            .cloned()
    }

    /// Block until the job in flight for `key` finishes; return at once when none is
    pub async fn await_if_in_flight(&self, key: &str) -> std::result::Result<(), QueueError> {
        match self.lookup(key).await {
            Some(handle) => handle.finished().await,
            None => Ok(()),
        }
    }

    /// Start dispatching jobs to `handler`
    pub async fn start(
        &self,
        handler: Arc<dyn JobHandler>,
    ) -> std::result::Result<JoinHandle<()>, QueueError> {
        let mut receiver = self
            .inner
            .receiver
            .lock()
            .await
            .take()
            .ok_or(QueueError::AlreadyStarted)?;

        let inner = self.inner.clone();
        info!("Job queue started");

        Ok(tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let inner = inner.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    inner.run(job, handler).await;
                });
            }
        }))
    }
}

impl QueueInner {
    async fn run(&self, job: QueuedJob, handler: Arc<dyn JobHandler>) {
        let _permit = match job.kind.lane() {
            Lane::Ingestion => match self.ingestion_lane.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.finish(&job, JobState::Failed("ingestion lane closed".to_string()))
                        .await;
                    return;
                }
            },
            Lane::Backfill => None,
        };

        let mut attempt = 0;
        let mut stalls = 0;
        let mut retries = 0;

        let outcome = loop {
            attempt += 1;
            job.state.send_replace(JobState::Active);

            match self.attempt(&job, attempt, handler.as_ref()).await {
                Attempt::Done(Ok(())) => break JobState::Completed,
                Attempt::Done(Err(e)) => {
                    if retries < self.config.max_retries {
                        retries += 1;
                        warn!(
                            key = %job.key,
                            "Job failed, retrying ({}/{}): {}",
                            retries,
                            self.config.max_retries,
                            e
                        );
                        continue;
                    }
                    warn!(key = %job.key, "Job failed: {}", e);
                    break JobState::Failed(e.to_string());
                }
                Attempt::Stalled => {
                    stalls += 1;
                    if stalls > self.config.max_stalled {
                        error!(key = %job.key, "Job stalled {} times, abandoning", stalls);
                        break JobState::Failed(format!("stalled {} times", stalls));
                    }
                    warn!(key = %job.key, "Job stalled, requeueing");
                    job.state.send_replace(JobState::Waiting);
                }
            }
        };

        self.finish(&job, outcome).await;
    }

    async fn attempt(&self, job: &QueuedJob, attempt: u32, handler: &dyn JobHandler) -> Attempt {
        let (progress, mut beats) = watch::channel(0u64);
        let ctx = JobContext {
            job_id: job.id.clone(),
            key: job.key.clone(),
            attempt,
            progress,
        };

        let work = handler.handle(&job.kind, &ctx);
        tokio::pin!(work);

        loop {
            tokio::select! {
                result = &mut work => return Attempt::Done(result),
                beat = tokio::time::timeout(self.config.stall_window, beats.changed()) => {
                    match beat {
                        Ok(Ok(())) => continue,
                        Ok(Err(_)) => return Attempt::Done((&mut work).await),
                        Err(_) => return Attempt::Stalled,
                    }
                }
            }
        }
    }

    /// Free the key, then publish the terminal state
    async fn finish(&self, job: &QueuedJob, state: JobState) {
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.get(&job.key).map_or(false, |h| h.id == job.id) {
                in_flight.remove(&job.key);
            }
        }

        debug!(key = %job.key, job_id = %job.id, state = ?state, "Job finished");
        job.state.send_replace(state);
    }
}
