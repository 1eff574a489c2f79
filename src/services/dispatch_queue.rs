//! Retrying asynchronous job queue with a bounded worker pool.
//!
//! Jobs are persisted through a [`JobStore`] and executed by the
//! [`JobHandler`] registered for their kind. A scheduler task claims due
//! jobs whenever it is woken by an enqueue, a finishing worker, or the poll
//! tick, and never holds more claimed jobs than it has free permits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::{Job, QueueConfig};
use crate::domain::ports::{JobCounts, JobHandler, JobStore};

/// Exponential backoff between attempts: `initial * 2^(attempts - 1)`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have run.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63);
        let backoff_ms = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.max_backoff.as_millis() as u64);

        Duration::from_millis(backoff_ms)
    }
}

/// Settings for one dispatch queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl QueueSettings {
    /// Settings for a queue with the given concurrency, retries and polling
    /// taken from config.
    pub fn from_config(config: &QueueConfig, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.max_backoff_ms),
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct QueueInner {
    name: String,
    store: Arc<dyn JobStore>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    settings: QueueSettings,
    permits: Arc<Semaphore>,
    wake: Notify,
}

/// Named job queue over a [`JobStore`].
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
    shutdown: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    recovered: Mutex<bool>,
}

impl DispatchQueue {
    pub fn new(name: impl Into<String>, store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                store,
                handlers: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
                settings,
                wake: Notify::new(),
            }),
            shutdown,
            scheduler: Mutex::new(None),
            recovered: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Register the handler for a job kind, replacing any previous one.
    pub async fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.inner.handlers.write().await.insert(kind.into(), handler);
    }

    /// Persist a job and wake the scheduler. Never runs the job inline.
    pub async fn enqueue(&self, kind: &str, payload: JsonValue) -> QueueResult<Uuid> {
        let job = Job::new(&self.inner.name, kind, payload, self.inner.settings.retry.max_attempts);
        self.inner.store.insert(&job).await?;
        tracing::debug!(queue = %self.inner.name, job_id = %job.id, kind, "Job enqueued");
        self.inner.wake.notify_one();
        Ok(job.id)
    }

    /// Start the scheduler. The first start settles jobs a dead process left
    /// Running: requeued with attempts left, failed otherwise. Starting a
    /// running queue is a no-op.
    pub async fn start(&self) -> QueueResult<()> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let mut recovered = self.recovered.lock().await;
        if !*recovered {
            let recovered_jobs = self.inner.store.recover_running(&self.inner.name, Utc::now()).await?;
            if recovered_jobs.requeued > 0 || recovered_jobs.failed > 0 {
                tracing::warn!(
                    queue = %self.inner.name,
                    requeued = recovered_jobs.requeued,
                    failed = recovered_jobs.failed,
                    "Recovered interrupted jobs"
                );
            }
            *recovered = true;
        }

        self.shutdown.send_replace(false);
        let inner = self.inner.clone();
        let shutdown = self.shutdown.subscribe();
        *scheduler = Some(tokio::spawn(run_scheduler(inner, shutdown)));

        tracing::info!(
            queue = %self.inner.name,
            concurrency = self.inner.settings.concurrency,
            "Dispatch queue started"
        );
        Ok(())
    }

    /// Stop claiming new jobs. In-flight handlers run to completion.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.scheduler.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(queue = %self.inner.name, error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!(queue = %self.inner.name, "Dispatch queue stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn job(&self, id: Uuid) -> QueueResult<Job> {
        self.inner.store.get(id).await?.ok_or(QueueError::JobNotFound(id))
    }

    pub async fn stats(&self) -> QueueResult<JobCounts> {
        self.inner.store.counts(&self.inner.name).await
    }

    /// Wait until no job is pending or running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> QueueResult<bool> {
        let poll = self.inner.settings.poll_interval.min(Duration::from_millis(50));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.stats().await?.active() == 0 {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

async fn run_scheduler(inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.settings.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        drain(&inner).await;

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = inner.wake.notified() => {}
            _ = ticker.tick() => {}
        }
    }
}

/// Claim and spawn due jobs until the pool is full or nothing is due.
async fn drain(inner: &Arc<QueueInner>) {
    loop {
        let free = inner.permits.available_permits();
        if free == 0 {
            return;
        }

        let jobs = match inner.store.claim_due(&inner.name, Utc::now(), free).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(queue = %inner.name, error = %e, "Failed to claim jobs");
                return;
            }
        };
        if jobs.is_empty() {
            return;
        }

        for job in jobs {
            let permit = match inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            tokio::spawn(run_job(inner.clone(), job, permit));
        }
    }
}

async fn run_job(inner: Arc<QueueInner>, mut job: Job, permit: OwnedSemaphorePermit) {
    let handler = inner.handlers.read().await.get(&job.kind).cloned();

    let outcome = match handler {
        None => Err(format!("No handler registered for job kind '{}'", job.kind)),
        Some(handler) => {
            let attempt = job.clone();
            // A panic inside the handler surfaces as a JoinError here.
            match tokio::spawn(async move { handler.handle(&attempt).await }).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(e) if e.is_panic() => Err(format!("Handler panicked: {}", panic_message(e))),
                Err(e) => Err(format!("Handler task failed: {e}")),
            }
        }
    };

    let now = Utc::now();
    match outcome {
        Ok(()) => {
            job.complete(now);
            tracing::debug!(queue = %inner.name, job_id = %job.id, attempts = job.attempts, "Job completed");
        }
        Err(error) => {
            let delay = inner.settings.retry.backoff(job.attempts);
            let run_after = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            job.fail_attempt(error.clone(), now, run_after);
            if job.status.is_terminal() {
                tracing::error!(
                    queue = %inner.name, job_id = %job.id, kind = %job.kind,
                    attempts = job.attempts, error = %error,
                    "Job failed permanently"
                );
            } else {
                tracing::warn!(
                    queue = %inner.name, job_id = %job.id, kind = %job.kind,
                    attempts = job.attempts, retry_in_ms = delay.as_millis() as u64, error = %error,
                    "Job attempt failed, will retry"
                );
            }
        }
    }

    if let Err(e) = inner.store.save(&job).await {
        tracing::error!(queue = %inner.name, job_id = %job.id, error = %e, "Failed to persist job outcome");
    }

    drop(permit);
    inner.wake.notify_one();
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
