//! Common test utilities for integration tests
//!
//! Shared fixtures and handlers used across integration test files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tokio::sync::Mutex;

use tripwire::domain::models::{CanonicalEvent, Job};
use tripwire::domain::ports::{ExecutionSink, JobHandler};
use tripwire::services::{QueueSettings, RetryPolicy};

/// Create a temporary test database
///
/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("jobs.db");
    (dir, db_path)
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Queue settings with millisecond backoff and polling.
pub fn fast_settings(concurrency: usize, max_attempts: u32) -> QueueSettings {
    QueueSettings::default()
        .with_concurrency(concurrency)
        .with_poll_interval(Duration::from_millis(5))
        .with_retry(RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        })
}

/// A raw deposit in the shape webhooks deliver.
pub fn deposit(signature: &str, amount: f64, timestamp: i64) -> JsonValue {
    json!({
        "type": "deposit",
        "timestamp": timestamp,
        "signature": signature,
        "data": {"amount": amount, "token": "USDC"}
    })
}

/// Records every execution it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Mutex<Vec<(String, String, CanonicalEvent)>>,
}

#[async_trait]
impl ExecutionSink for RecordingSink {
    async fn execute(&self, owner_id: &str, trigger_id: &str, event: &CanonicalEvent) -> anyhow::Result<()> {
        self.calls
            .lock()
            .await
            .push((owner_id.to_string(), trigger_id.to_string(), event.clone()));
        Ok(())
    }
}

/// Tracks how many jobs run at once and the highest level reached.
pub struct GaugeHandler {
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub finished: AtomicUsize,
    pub hold: Duration,
}

impl GaugeHandler {
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            hold,
        })
    }
}

#[async_trait]
impl JobHandler for GaugeHandler {
    async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyHandler {
    pub calls: AtomicUsize,
    pub failures: usize,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
        })
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, _job: &Job) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("attempt {call} failed");
        }
        Ok(())
    }
}
