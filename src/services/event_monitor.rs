//! Event monitor: the ingestion pipeline and its observability surface.
//!
//! Every inbound payload, from a webhook batch or from the live connection,
//! takes the same path: fingerprint, drop if recently seen, normalize, match
//! against the registered triggers, enqueue one execution job per match,
//! record the outcome on the event, and buffer it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use crate::domain::errors::QueueResult;
use crate::domain::models::{CanonicalEvent, Config, EventType, Job, Trigger};
use crate::domain::ports::{ExecutionSink, JobCounts, JobHandler, JobStore, RawEventSink};

use super::deduplicator::{fingerprint, DedupWindow};
use super::dispatch_queue::{DispatchQueue, QueueSettings};
use super::event_buffer::EventBuffer;
use super::normalizer::Normalizer;
use super::trigger_registry::{TriggerMatch, TriggerRegistry};

/// Job kind for one trigger execution.
pub const EXECUTE_JOB: &str = "trigger.execute";
/// Job kind for one deferred webhook batch.
pub const INGEST_JOB: &str = "webhook.ingest";

pub const EXECUTION_QUEUE: &str = "execution";
pub const INGESTION_QUEUE: &str = "ingestion";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub dedup_window: usize,
    pub buffer_capacity: usize,
    pub execution: QueueSettings,
    pub ingestion: QueueSettings,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            dedup_window: 500,
            buffer_capacity: 1000,
            execution: QueueSettings::default().with_concurrency(8),
            ingestion: QueueSettings::default().with_concurrency(4),
        }
    }
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedup_window: config.ingestion.dedup_window,
            buffer_capacity: config.ingestion.buffer_capacity,
            execution: QueueSettings::from_config(&config.queue, config.queue.execution_concurrency),
            ingestion: QueueSettings::from_config(&config.queue, config.queue.ingest_concurrency),
        }
    }
}

/// Why an inbound payload did not become a buffered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    Malformed,
}

/// Pipeline events for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorSignal {
    EventProcessed {
        event_id: String,
        event_type: EventType,
        matches: usize,
    },
    EventRejected {
        fingerprint: String,
        reason: RejectReason,
        detail: String,
    },
    TriggerMatched(TriggerMatch),
}

/// Outcome of one `ingest` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub matched: usize,
    /// Ids of the events appended to the buffer, in order.
    pub event_ids: Vec<String>,
    pub jobs: Vec<Uuid>,
    pub errors: Vec<String>,
}

/// A previewed event and the triggers it would fire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewMatch {
    pub event: CanonicalEvent,
    pub matches: Vec<TriggerMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    /// Raw payloads handed to the pipeline, duplicates and malformed included.
    pub received: u64,
    pub processed: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub matched: u64,
    pub dispatch_errors: u64,
    pub rule_errors: u64,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub dedup_size: usize,
    pub owners: usize,
    pub triggers: usize,
    pub active_triggers: usize,
    pub execution_jobs: JobCounts,
    pub ingestion_jobs: JobCounts,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
    matched: AtomicU64,
    dispatch_errors: AtomicU64,
}

/// Execution job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    pub owner_id: String,
    pub trigger_id: String,
    pub event: CanonicalEvent,
}

pub struct EventMonitor {
    normalizer: Normalizer,
    dedup: Mutex<DedupWindow>,
    buffer: RwLock<EventBuffer>,
    registry: RwLock<TriggerRegistry>,
    execution: DispatchQueue,
    ingestion: DispatchQueue,
    sink: Arc<dyn ExecutionSink>,
    signals: broadcast::Sender<MonitorSignal>,
    counters: Counters,
}

impl EventMonitor {
    pub fn new(settings: MonitorSettings, store: Arc<dyn JobStore>, sink: Arc<dyn ExecutionSink>) -> Arc<Self> {
        let (signals, _) = broadcast::channel(1024);
        Arc::new(Self {
            normalizer: Normalizer::new(),
            dedup: Mutex::new(DedupWindow::new(settings.dedup_window)),
            buffer: RwLock::new(EventBuffer::new(settings.buffer_capacity)),
            registry: RwLock::new(TriggerRegistry::new()),
            execution: DispatchQueue::new(EXECUTION_QUEUE, store.clone(), settings.execution),
            ingestion: DispatchQueue::new(INGESTION_QUEUE, store, settings.ingestion),
            sink,
            signals,
            counters: Counters::default(),
        })
    }

    pub fn signals(&self) -> broadcast::Receiver<MonitorSignal> {
        self.signals.subscribe()
    }

    fn emit(&self, signal: MonitorSignal) {
        let _ = self.signals.send(signal);
    }

    /// Register job handlers and start both queues. Fails only when the
    /// job store cannot be read.
    pub async fn start(self: &Arc<Self>) -> QueueResult<()> {
        self.execution
            .register_handler(EXECUTE_JOB, Arc::new(TriggerExecutionHandler::new(self.sink.clone())))
            .await;
        self.ingestion
            .register_handler(INGEST_JOB, Arc::new(WebhookIngestHandler { monitor: Arc::downgrade(self) }))
            .await;

        self.execution.start().await?;
        self.ingestion.start().await?;
        tracing::info!("Event monitor started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.ingestion.stop().await;
        self.execution.stop().await;
        tracing::info!("Event monitor stopped");
    }

    /// Webhook intake: defer a batch to the ingestion queue.
    pub async fn submit(&self, batch: Vec<JsonValue>) -> QueueResult<Uuid> {
        let count = batch.len();
        let id = self.ingestion.enqueue(INGEST_JOB, json!({ "batch": batch })).await?;
        tracing::debug!(job_id = %id, count, "Webhook batch accepted");
        Ok(id)
    }

    /// Run a batch through the pipeline now, in array order.
    #[tracing::instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn ingest(&self, batch: &[JsonValue]) -> IngestReport {
        let mut report = IngestReport {
            received: batch.len(),
            ..IngestReport::default()
        };

        for raw in batch {
            self.counters.received.fetch_add(1, Ordering::Relaxed);
            let fp = fingerprint(raw);

            if !self.dedup.lock().await.remember(&fp) {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                report.duplicates += 1;
                tracing::debug!(fingerprint = %fp, "Duplicate event dropped");
                self.emit(MonitorSignal::EventRejected {
                    fingerprint: fp,
                    reason: RejectReason::Duplicate,
                    detail: "seen recently".to_string(),
                });
                continue;
            }

            let mut event = match self.normalizer.normalize_fingerprinted(raw, &fp) {
                Ok(event) => event,
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    report.errors.push(e.to_string());
                    tracing::warn!(fingerprint = %fp, error = %e, "Malformed event skipped");
                    self.emit(MonitorSignal::EventRejected {
                        fingerprint: fp,
                        reason: RejectReason::Malformed,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            let matches = self.registry.read().await.find_matches(&event);
            let mut dispatch_error = None;
            let mut fired = 0;
            for m in &matches {
                match self.dispatch(m, &event).await {
                    Ok(None) => {
                        tracing::debug!(
                            event_id = %event.id, owner_id = %m.owner_id, trigger_id = %m.trigger_id,
                            "Trigger entered cooldown before dispatch"
                        );
                    }
                    Ok(Some(job_id)) => {
                        fired += 1;
                        report.jobs.push(job_id);
                        report.matched += 1;
                        self.counters.matched.fetch_add(1, Ordering::Relaxed);
                        self.emit(MonitorSignal::TriggerMatched(m.clone()));
                    }
                    Err(e) => {
                        self.counters.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            event_id = %event.id, owner_id = %m.owner_id, trigger_id = %m.trigger_id,
                            error = %e, "Failed to enqueue trigger execution"
                        );
                        report.errors.push(e.to_string());
                        dispatch_error.get_or_insert_with(|| e.to_string());
                    }
                }
            }

            event.mark_dispatched(dispatch_error);
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, matches = fired, "Event processed");
            self.emit(MonitorSignal::EventProcessed {
                event_id: event.id.clone(),
                event_type: event.event_type,
                matches: fired,
            });
            report.event_ids.push(event.id.clone());
            self.buffer.write().await.append(event);
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
            report.processed += 1;
        }

        report
    }

    /// Enqueue one execution and start the trigger's cooldown.
    ///
    /// Matching ran under a read lock, so a concurrent ingest may have fired
    /// the same trigger since. The cooldown is checked again under the write
    /// lock, held across the enqueue; `None` means the match was dropped.
    async fn dispatch(&self, m: &TriggerMatch, event: &CanonicalEvent) -> QueueResult<Option<Uuid>> {
        let payload = serde_json::to_value(ExecutionPayload {
            owner_id: m.owner_id.clone(),
            trigger_id: m.trigger_id.clone(),
            event: event.clone(),
        })?;

        let mut registry = self.registry.write().await;
        if registry.cooling_down(&m.owner_id, &m.trigger_id, event.timestamp) {
            return Ok(None);
        }
        let job_id = self.execution.enqueue(EXECUTE_JOB, payload).await?;
        registry.record_fired(&m.owner_id, &m.trigger_id, event.timestamp);
        Ok(Some(job_id))
    }

    /// Normalize a batch exactly as `ingest` would, without touching dedup
    /// state, the buffer, counters or cooldowns. Malformed items are skipped.
    pub fn preview_normalized_events(&self, batch: &[JsonValue]) -> Vec<CanonicalEvent> {
        batch
            .iter()
            .filter_map(|raw| self.normalizer.normalize(raw).ok())
            .collect()
    }

    /// Normalize and match a batch without side effects.
    pub async fn preview_matches(&self, batch: &[JsonValue]) -> Vec<PreviewMatch> {
        let registry = self.registry.read().await;
        self.preview_normalized_events(batch)
            .into_iter()
            .map(|event| PreviewMatch {
                matches: registry.evaluate_event(&event).matches,
                event,
            })
            .collect()
    }

    pub async fn set_triggers(&self, owner_id: &str, triggers: Vec<Trigger>) {
        let count = triggers.len();
        self.registry.write().await.set_triggers(owner_id, triggers);
        tracing::info!(owner_id, count, "Triggers registered");
    }

    pub async fn clear_triggers(&self, owner_id: &str) -> usize {
        let removed = self.registry.write().await.clear_triggers(owner_id);
        tracing::info!(owner_id, removed, "Triggers cleared");
        removed
    }

    pub async fn triggers_for(&self, owner_id: &str) -> Vec<Trigger> {
        self.registry.read().await.triggers_for(owner_id).to_vec()
    }

    pub async fn recent_events(&self, limit: usize) -> Vec<CanonicalEvent> {
        self.buffer.read().await.recent(limit)
    }

    pub async fn events_by_type(&self, event_type: EventType, limit: usize) -> Vec<CanonicalEvent> {
        self.buffer.read().await.by_type(event_type, limit)
    }

    pub async fn stats(&self) -> QueueResult<MonitorStats> {
        let registry = self.registry.read().await.stats();
        let (buffered, buffer_capacity) = {
            let buffer = self.buffer.read().await;
            (buffer.len(), buffer.capacity())
        };

        Ok(MonitorStats {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            dispatch_errors: self.counters.dispatch_errors.load(Ordering::Relaxed),
            rule_errors: registry.rule_errors,
            buffered,
            buffer_capacity,
            dedup_size: self.dedup.lock().await.len(),
            owners: registry.owners,
            triggers: registry.triggers,
            active_triggers: registry.active_triggers,
            execution_jobs: self.execution.stats().await?,
            ingestion_jobs: self.ingestion.stats().await?,
        })
    }

    /// Wait until both queues have no pending or running jobs.
    pub async fn wait_idle(&self, timeout: Duration) -> QueueResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        // Ingestion first: it can enqueue execution jobs.
        if !self.ingestion.wait_idle(timeout).await? {
            return Ok(false);
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.execution.wait_idle(remaining).await
    }
}

#[async_trait]
impl RawEventSink for EventMonitor {
    async fn accept(&self, raw: JsonValue) {
        self.ingest(std::slice::from_ref(&raw)).await;
    }
}

/// Runs `trigger.execute` jobs against the execution sink.
pub struct TriggerExecutionHandler {
    sink: Arc<dyn ExecutionSink>,
}

impl TriggerExecutionHandler {
    pub fn new(sink: Arc<dyn ExecutionSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobHandler for TriggerExecutionHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let payload: ExecutionPayload = serde_json::from_value(job.payload.clone())?;
        self.sink
            .execute(&payload.owner_id, &payload.trigger_id, &payload.event)
            .await
    }
}

/// Runs deferred `webhook.ingest` batches through the monitor.
struct WebhookIngestHandler {
    monitor: Weak<EventMonitor>,
}

#[async_trait]
impl JobHandler for WebhookIngestHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        let Some(monitor) = self.monitor.upgrade() else {
            anyhow::bail!("event monitor is gone");
        };
        let batch = match job.payload.get("batch") {
            Some(JsonValue::Array(items)) => items.as_slice(),
            _ => anyhow::bail!("webhook.ingest payload has no batch array"),
        };

        let report = monitor.ingest(batch).await;
        tracing::info!(
            job_id = %job.id,
            received = report.received,
            processed = report.processed,
            duplicates = report.duplicates,
            failed = report.failed,
            matched = report.matched,
            "Webhook batch ingested"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryJobStore;
    use crate::domain::models::{Condition, ConditionOperator};

    struct RecordingSink(Mutex<Vec<(String, String, String)>>);

    #[async_trait]
    impl ExecutionSink for RecordingSink {
        async fn execute(&self, owner_id: &str, trigger_id: &str, event: &CanonicalEvent) -> anyhow::Result<()> {
            self.0
                .lock()
                .await
                .push((owner_id.to_string(), trigger_id.to_string(), event.id.clone()));
            Ok(())
        }
    }

    fn fast_settings() -> MonitorSettings {
        let queue = QueueSettings::default().with_poll_interval(Duration::from_millis(5));
        MonitorSettings {
            dedup_window: 100,
            buffer_capacity: 100,
            execution: queue.clone().with_concurrency(4),
            ingestion: queue.with_concurrency(2),
        }
    }

    fn monitor() -> (Arc<EventMonitor>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let monitor = EventMonitor::new(fast_settings(), Arc::new(InMemoryJobStore::new()), sink.clone());
        (monitor, sink)
    }

    fn deposit(amount: i64, ts: i64) -> JsonValue {
        json!({"type": "deposit", "timestamp": ts, "data": {"amount": amount, "account": "A1"}})
    }

    fn large_deposit_trigger() -> Trigger {
        Trigger::new("large", "agent-1", EventType::Deposit)
            .with_condition(Condition::new("parsedData.amount", ConditionOperator::GreaterThan, 100_i64))
            .with_condition(Condition::new("type", ConditionOperator::Equals, "deposit").and())
    }

    #[tokio::test]
    async fn test_duplicate_is_counted_not_processed() {
        let (monitor, _) = monitor();
        let report = monitor.ingest(&[deposit(10, 1_700_000_000), deposit(10, 1_700_000_000)]).await;

        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(monitor.recent_events(10).await.len(), 1);

        let stats = monitor.stats().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_malformed_item_does_not_stop_batch() {
        let (monitor, _) = monitor();
        let report = monitor
            .ingest(&[json!("nope"), json!({"type": "swap"}), deposit(1, 1_700_000_001)])
            .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_match_enqueues_and_executes() {
        let (monitor, sink) = monitor();
        monitor.set_triggers("agent-1", vec![large_deposit_trigger()]).await;
        monitor.start().await.unwrap();

        let report = monitor.ingest(&[deposit(150, 1_700_000_000), deposit(50, 1_700_000_001)]).await;
        assert_eq!(report.matched, 1);
        assert_eq!(report.jobs.len(), 1);

        assert!(monitor.wait_idle(Duration::from_secs(5)).await.unwrap());
        let executed = sink.0.lock().await.clone();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "agent-1");
        assert_eq!(executed[0].1, "large");
        assert_eq!(executed[0].2, report.event_ids[0]);

        let buffered = monitor.recent_events(10).await;
        assert!(buffered.iter().all(|e| e.processed));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let (monitor, _) = monitor();
        monitor.set_triggers("agent-1", vec![large_deposit_trigger().with_cooldown(3600)]).await;
        let batch = vec![deposit(150, 1_700_000_000), deposit(20, 1_700_000_005)];

        let first = monitor.preview_matches(&batch).await;
        let second = monitor.preview_matches(&batch).await;
        assert_eq!(first, second);
        assert_eq!(first[0].matches.len(), 1);
        assert!(first[1].matches.is_empty());

        let stats = monitor.stats().await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.dedup_size, 0);
        assert_eq!(stats.buffered, 0);

        let previewed = monitor.preview_normalized_events(&batch);
        let report = monitor.ingest(&batch).await;
        let buffered = monitor.recent_events(10).await;
        assert_eq!(report.processed, 2);
        for (p, b) in previewed.iter().zip(&buffered) {
            assert_eq!(p.id, b.id);
            assert_eq!(p.event_type, b.event_type);
            assert_eq!(p.timestamp, b.timestamp);
            assert_eq!(p.parsed_data, b.parsed_data);
        }
    }

    #[tokio::test]
    async fn test_cooldown_applies_after_dispatch() {
        let (monitor, _) = monitor();
        monitor.set_triggers("agent-1", vec![large_deposit_trigger().with_cooldown(60)]).await;

        let report = monitor
            .ingest(&[deposit(150, 1_700_000_000), deposit(151, 1_700_000_030), deposit(152, 1_700_000_061)])
            .await;
        assert_eq!(report.processed, 3);
        assert_eq!(report.matched, 2);
    }

    #[tokio::test]
    async fn test_received_counts_every_payload() {
        let (monitor, _) = monitor();
        monitor
            .ingest(&[deposit(1, 1_700_000_000), deposit(1, 1_700_000_000), json!({"type": "deposit"})])
            .await;
        monitor.ingest(&[deposit(2, 1_700_000_001)]).await;

        let stats = monitor.stats().await.unwrap();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_flat_payloads_with_different_fields_both_process() {
        let (monitor, _) = monitor();
        let report = monitor
            .ingest(&[
                json!({"type": "deposit", "timestamp": 1_700_000_000, "signature": "sigA", "amount": 150}),
                json!({"type": "deposit", "timestamp": 1_700_000_000, "signature": "sigB", "amount": 50}),
            ])
            .await;

        assert_eq!(report.processed, 2);
        assert_eq!(report.duplicates, 0);
        let amounts: Vec<JsonValue> = monitor
            .recent_events(10)
            .await
            .iter()
            .map(|e| e.parsed_data["amount"].clone())
            .collect();
        assert!(amounts.contains(&json!(150)) && amounts.contains(&json!(50)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest_fires_once_per_cooldown() {
        let (monitor, _) = monitor();
        monitor.set_triggers("agent-1", vec![large_deposit_trigger().with_cooldown(3600)]).await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let monitor = monitor.clone();
                tokio::spawn(async move { monitor.ingest(&[deposit(200 + i, 1_700_000_000)]).await })
            })
            .collect();

        let mut matched = 0;
        let mut processed = 0;
        for task in tasks {
            let report = task.await.unwrap();
            matched += report.matched;
            processed += report.processed;
        }
        assert_eq!(processed, 16);
        assert_eq!(matched, 1);
        assert_eq!(monitor.stats().await.unwrap().execution_jobs.pending, 1);
    }

    #[tokio::test]
    async fn test_submit_defers_to_ingestion_queue() {
        let (monitor, _) = monitor();
        let mut signals = monitor.signals();
        monitor.start().await.unwrap();

        monitor.submit(vec![deposit(5, 1_700_000_000)]).await.unwrap();
        assert!(monitor.wait_idle(Duration::from_secs(5)).await.unwrap());

        assert_eq!(monitor.events_by_type(EventType::Deposit, 5).await.len(), 1);
        let signal = tokio::time::timeout(Duration::from_secs(1), signals.recv()).await.unwrap().unwrap();
        assert!(matches!(signal, MonitorSignal::EventProcessed { matches: 0, .. }));
        monitor.stop().await;
    }
}
