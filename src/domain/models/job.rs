//! Dispatch job model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error recorded on a job whose final attempt was cut short by a crash.
pub const INTERRUPTED_ERROR: &str = "interrupted during final attempt";

/// Lifecycle state of a dispatch job.
///
/// `Pending -> Running -> (Completed | Pending[retry] -> Running ...) -> Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Pending)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of dispatched work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    /// Name of the queue that owns the job.
    pub queue: String,
    /// Handler selector.
    pub kind: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed (pushed forward by backoff).
    pub run_after: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        kind: impl Into<String>,
        payload: JsonValue,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            kind: kind.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            created_at: now,
            run_after: now,
            completed_at: None,
            failed_at: None,
            error: None,
        }
    }

    /// Pending -> Running. Counts the attempt.
    pub fn start_attempt(&mut self) -> bool {
        if !self.status.can_transition_to(JobStatus::Running) {
            return false;
        }
        self.status = JobStatus::Running;
        self.attempts += 1;
        true
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(JobStatus::Completed) {
            return false;
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(at);
        true
    }

    /// Record a failed attempt: back to Pending until `run_after`, or
    /// terminal Failed once attempts are exhausted.
    pub fn fail_attempt(&mut self, error: impl Into<String>, at: DateTime<Utc>, run_after: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.error = Some(error.into());
        if self.attempts >= self.max_attempts {
            self.status = JobStatus::Failed;
            self.failed_at = Some(at);
        } else {
            self.status = JobStatus::Pending;
            self.run_after = run_after;
        }
        true
    }

    /// Running job orphaned by a dead process: back to Pending while it has
    /// attempts left, otherwise Failed. The interrupted attempt stays counted.
    pub fn interrupt(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        if self.attempts >= self.max_attempts {
            self.status = JobStatus::Failed;
            self.failed_at = Some(at);
            self.error = Some(INTERRUPTED_ERROR.to_string());
        } else {
            self.status = JobStatus::Pending;
        }
        true
    }
}
