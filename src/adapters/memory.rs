//! In-process job store.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::{Job, JobStatus};
use crate::domain::ports::{JobCounts, JobStore, Recovered};

/// Completed and failed jobs kept for lookup by default.
pub const DEFAULT_FINISHED_RETENTION: usize = 10_000;

/// Claim order within a queue: due time, then insertion sequence.
type PendingKey = (DateTime<Utc>, u64);

#[derive(Default)]
struct Jobs {
    by_id: HashMap<Uuid, Job>,
    /// Per-queue pending index, earliest `run_after` first.
    pending: HashMap<String, BTreeMap<PendingKey, Uuid>>,
    pending_keys: HashMap<Uuid, PendingKey>,
    /// Terminal jobs oldest first; trimmed to the retention limit.
    finished: VecDeque<Uuid>,
    /// Lifetime per-queue counts. Evicting a finished job does not change them.
    counts: HashMap<String, JobCounts>,
    next_seq: u64,
}

impl Jobs {
    /// Store `job`, replacing any previous copy and re-indexing it.
    fn put(&mut self, job: Job, retention: usize) {
        let previous = self.by_id.insert(job.id, job.clone());
        if let Some(previous) = &previous {
            self.unindex_pending(previous.id, &previous.queue);
            adjust(self.counts.entry(previous.queue.clone()).or_default(), previous.status, -1);
        }
        adjust(self.counts.entry(job.queue.clone()).or_default(), job.status, 1);

        match job.status {
            JobStatus::Pending => {
                let key = (job.run_after, self.next_seq);
                self.next_seq += 1;
                self.pending.entry(job.queue.clone()).or_default().insert(key, job.id);
                self.pending_keys.insert(job.id, key);
            }
            JobStatus::Running => {}
            JobStatus::Completed | JobStatus::Failed => {
                let was_finished = previous.is_some_and(|p| p.status.is_terminal());
                if !was_finished {
                    self.finished.push_back(job.id);
                    self.evict_finished(retention);
                }
            }
        }
    }

    fn unindex_pending(&mut self, id: Uuid, queue: &str) {
        if let Some(key) = self.pending_keys.remove(&id) {
            if let Some(index) = self.pending.get_mut(queue) {
                index.remove(&key);
            }
        }
    }

    fn evict_finished(&mut self, retention: usize) {
        while self.finished.len() > retention {
            if let Some(id) = self.finished.pop_front() {
                self.by_id.remove(&id);
            }
        }
    }
}

fn adjust(counts: &mut JobCounts, status: JobStatus, delta: i64) {
    let slot = match status {
        JobStatus::Pending => &mut counts.pending,
        JobStatus::Running => &mut counts.running,
        JobStatus::Completed => &mut counts.completed,
        JobStatus::Failed => &mut counts.failed,
    };
    *slot = slot.saturating_add_signed(delta);
}

/// Job store that lives only as long as the process. Jobs still pending
/// at exit are lost.
///
/// Claiming walks only the due front of a per-queue pending index, so its
/// cost does not grow with finished work. Finished jobs stay fetchable until
/// the retention limit pushes them out; counts cover every job ever stored.
pub struct InMemoryJobStore {
    jobs: Mutex<Jobs>,
    finished_retention: usize,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `finished_retention` completed or failed jobs.
    pub fn with_retention(finished_retention: usize) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            finished_retention,
        }
    }

    /// Jobs currently held, finished ones included.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.by_id.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.jobs.lock().await.put(job.clone(), self.finished_retention);
        Ok(())
    }

    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        let mut jobs = self.jobs.lock().await;

        let due: Vec<Uuid> = match jobs.pending.get(queue) {
            Some(index) => index
                .range(..=(now, u64::MAX))
                .take(limit)
                .map(|(_, id)| *id)
                .collect(),
            None => return Ok(Vec::new()),
        };

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let Some(mut job) = jobs.by_id.get(&id).cloned() else {
                continue;
            };
            if job.start_attempt() {
                jobs.put(job.clone(), self.finished_retention);
                claimed.push(job);
            }
        }
        Ok(claimed)
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.lock().await;
        if !jobs.by_id.contains_key(&job.id) {
            return Err(QueueError::JobNotFound(job.id));
        }
        jobs.put(job.clone(), self.finished_retention);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        Ok(self.jobs.lock().await.by_id.get(&id).cloned())
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        Ok(self.jobs.lock().await.counts.get(queue).copied().unwrap_or_default())
    }

    async fn recover_running(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Recovered> {
        let mut jobs = self.jobs.lock().await;
        let running: Vec<Job> = jobs
            .by_id
            .values()
            .filter(|j| j.queue == queue && j.status == JobStatus::Running)
            .cloned()
            .collect();

        let mut recovered = Recovered::default();
        for mut job in running {
            job.interrupt(now);
            if job.status == JobStatus::Failed {
                recovered.failed += 1;
            } else {
                recovered.requeued += 1;
            }
            jobs.put(job, self.finished_retention);
        }
        Ok(recovered)
    }
}
