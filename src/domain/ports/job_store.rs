//! Storage port for dispatch jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::QueueResult;
use crate::domain::models::Job;

/// Per-status job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    /// Jobs that still have work ahead of them.
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }
}

/// Outcome of recovering a queue's orphaned Running jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovered {
    /// Returned to Pending with attempts left.
    pub requeued: u64,
    /// Their interrupted attempt was the last one; now Failed.
    pub failed: u64,
}

/// Backing store for dispatch jobs.
///
/// When a durable store is configured it is the sole source of truth for
/// job state; the dispatch queue keeps no shadow copy.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly enqueued job.
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    /// Atomically move up to `limit` due pending jobs of `queue` to Running,
    /// incrementing their attempt count, oldest first.
    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>>;

    /// Persist the outcome of an attempt (completed, rescheduled, or failed).
    async fn save(&self, job: &Job) -> QueueResult<()>;

    /// Fetch a job by ID.
    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>>;

    /// Count jobs of `queue` by status.
    async fn counts(&self, queue: &str) -> QueueResult<JobCounts>;

    /// Settle jobs of `queue` stuck in Running (left by a dead process), as
    /// [`Job::interrupt`] does: Pending with attempts left, Failed otherwise.
    async fn recover_running(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Recovered>;
}
