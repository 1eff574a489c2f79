//! End-to-end ingestion: raw batch -> dedup -> normalize -> match ->
//! execution queue -> sink.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{deposit, RecordingSink};
use tripwire::adapters::{ChannelTransport, InMemoryJobStore};
use tripwire::application::Runtime;
use tripwire::domain::models::{
    Condition, ConditionOperator, Config, EventType, OwnerTriggers, Trigger,
};
use tripwire::services::MonitorSignal;

const WAIT: Duration = Duration::from_secs(5);

fn big_deposit_trigger() -> Trigger {
    Trigger::new("big-deposit", "", EventType::Deposit)
        .with_name("Large deposit")
        .with_condition(Condition::new("parsedData.amount", ConditionOperator::GreaterThan, 100.0))
        .with_condition(Condition::new("type", ConditionOperator::Equals, "deposit").and())
}

fn config_with_triggers() -> Config {
    let mut config = Config::default();
    config.queue.poll_interval_ms = 5;
    config.queue.initial_backoff_ms = 1;
    config.queue.max_backoff_ms = 10;
    config.triggers.push(OwnerTriggers {
        owner_id: "agent-1".to_string(),
        triggers: vec![big_deposit_trigger()],
    });
    config
}

async fn runtime(config: &Config, sink: Arc<RecordingSink>) -> Runtime {
    let (transport, _) = ChannelTransport::new();
    Runtime::assemble(config, Arc::new(InMemoryJobStore::new()), sink, Arc::new(transport))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_batch_flows_through_to_execution() {
    common::setup_test_logging();
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime(&config_with_triggers(), sink.clone()).await;
    runtime.start().await.unwrap();

    let batch = vec![
        deposit("sig-big", 150.0, 1_700_000_000),
        deposit("sig-small", 50.0, 1_700_000_001),
        deposit("sig-big", 150.0, 1_700_000_000),
        json!({"type": "deposit", "data": {"amount": 999}}),
    ];
    let report = runtime.monitor().ingest(&batch).await;

    assert_eq!(report.received, 4);
    assert_eq!(report.processed, 2);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(report.jobs.len(), 1);

    assert!(runtime.monitor().wait_idle(WAIT).await.unwrap());

    let calls = sink.calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (owner, trigger, event) = &calls[0];
    assert_eq!(owner, "agent-1");
    assert_eq!(trigger, "big-deposit");
    assert_eq!(event.source_signature, "sig-big");
    assert_eq!(event.parsed_data["amount"], json!(150.0));
    drop(calls);

    let stats = runtime.monitor().stats().await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.buffered, 2);
    assert_eq!(stats.execution_jobs.completed, 1);

    let recent = runtime.monitor().recent_events(10).await;
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|e| e.processed));

    runtime.stop().await;
}

#[tokio::test]
async fn test_webhook_submit_is_processed_by_ingestion_queue() {
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime(&config_with_triggers(), sink.clone()).await;
    runtime.start().await.unwrap();

    runtime
        .monitor()
        .submit(vec![deposit("sig-a", 500.0, 1_700_000_100), deposit("sig-b", 700.0, 1_700_000_200)])
        .await
        .unwrap();

    assert!(runtime.monitor().wait_idle(WAIT).await.unwrap());
    assert_eq!(sink.calls.lock().await.len(), 2);

    let stats = runtime.monitor().stats().await.unwrap();
    assert_eq!(stats.ingestion_jobs.completed, 1);
    assert_eq!(stats.execution_jobs.completed, 2);

    runtime.stop().await;
}

#[tokio::test]
async fn test_preview_matches_what_ingest_buffers() {
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime(&config_with_triggers(), sink.clone()).await;
    let monitor = runtime.monitor();

    let batch = vec![deposit("sig-1", 250.0, 1_700_000_300), deposit("sig-2", 10.0, 1_700_000_400)];

    let first = monitor.preview_matches(&batch).await;
    let second = monitor.preview_matches(&batch).await;
    assert_eq!(first, second, "preview is repeatable");
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].matches.len(), 1);
    assert!(first[1].matches.is_empty());
    assert_eq!(monitor.stats().await.unwrap().dedup_size, 0);
    assert!(monitor.recent_events(10).await.is_empty());

    monitor.ingest(&batch).await;
    let buffered = monitor.recent_events(10).await;
    assert_eq!(buffered.len(), 2);
    for (preview, event) in first.iter().zip(buffered.iter()) {
        assert_eq!(preview.event.id, event.id);
        assert_eq!(preview.event.event_type, event.event_type);
        assert_eq!(preview.event.timestamp, event.timestamp);
        assert_eq!(preview.event.parsed_data, event.parsed_data);
    }
}

#[tokio::test]
async fn test_signals_report_pipeline_outcomes() {
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime(&config_with_triggers(), sink).await;
    let mut signals = runtime.monitor().signals();

    let raw = deposit("sig-x", 300.0, 1_700_000_500);
    runtime.monitor().ingest(&[raw.clone(), raw]).await;

    let mut seen = Vec::new();
    while let Ok(Ok(signal)) = tokio::time::timeout(Duration::from_millis(200), signals.recv()).await {
        seen.push(signal);
    }

    assert!(seen.iter().any(|s| matches!(s, MonitorSignal::TriggerMatched(m) if m.trigger_id == "big-deposit")));
    assert!(seen
        .iter()
        .any(|s| matches!(s, MonitorSignal::EventProcessed { matches: 1, .. })));
    assert!(seen.iter().any(|s| matches!(s, MonitorSignal::EventRejected { .. })));
}

#[tokio::test]
async fn test_trigger_replacement_takes_effect() {
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime(&config_with_triggers(), sink).await;
    let monitor = runtime.monitor();

    let swap_trigger = Trigger::new("any-swap", "", EventType::Swap);
    monitor.set_triggers("agent-1", vec![swap_trigger]).await;

    let previews = monitor
        .preview_matches(&[
            deposit("sig-d", 900.0, 1_700_000_600),
            json!({"type": "swap", "timestamp": 1_700_000_700, "data": {"amountIn": 5}}),
        ])
        .await;
    assert!(previews[0].matches.is_empty());
    assert_eq!(previews[1].matches[0].trigger_id, "any-swap");

    assert_eq!(monitor.clear_triggers("agent-1").await, 1);
    assert!(monitor.triggers_for("agent-1").await.is_empty());
}
