//! Runtime wiring: turns a validated [`Config`] into a running monitor and,
//! when enabled, a live connection feeding it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::adapters::sqlite::{database_url, initialize_database};
use crate::adapters::{HttpExecutionSink, InMemoryJobStore, LogExecutionSink, SqliteJobStore, WebSocketTransport};
use crate::domain::models::{Config, ExecutionConfig, QueueBackendKind, QueueConfig};
use crate::domain::ports::{ExecutionSink, JobStore, RawEventSink, Transport};
use crate::services::{
    ConnectionManager, ConnectionSettings, ConnectionState, EventMonitor, MonitorSettings, MonitorStats,
};

/// Open the job store selected by `queue.backend`.
///
/// A SQLite store that cannot be opened or migrated is the one failure that
/// aborts startup.
pub async fn build_store(config: &QueueConfig) -> Result<Arc<dyn JobStore>> {
    match config.backend {
        QueueBackendKind::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        QueueBackendKind::Sqlite => {
            let url = database_url(Path::new(&config.database_path));
            let pool = initialize_database(&url)
                .await
                .with_context(|| format!("Failed to open job database at {}", config.database_path))?;
            tracing::info!(path = %config.database_path, "Using SQLite job store");
            Ok(Arc::new(SqliteJobStore::new(pool)))
        }
    }
}

/// HTTP sink when an endpoint is configured, log-only otherwise.
pub fn build_sink(config: &ExecutionConfig) -> Result<Arc<dyn ExecutionSink>> {
    match &config.endpoint {
        Some(endpoint) => {
            let sink = HttpExecutionSink::new(endpoint.clone(), Duration::from_millis(config.timeout_ms))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(LogExecutionSink)),
    }
}

/// Monitor counters joined with the live connection's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    #[serde(flatten)]
    pub monitor: MonitorStats,
    /// Active subscriptions on the connection; zero when it is disabled.
    pub subscriptions: usize,
    pub connected: bool,
    /// `None` when the connection is disabled.
    pub connection_state: Option<ConnectionState>,
}

pub struct Runtime {
    monitor: Arc<EventMonitor>,
    connection: Option<ConnectionManager>,
}

impl Runtime {
    /// Build every component named by `config`. Nothing is started yet.
    pub async fn build(config: &Config) -> Result<Self> {
        let store = build_store(&config.queue).await?;
        let sink = build_sink(&config.execution)?;
        let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::new());
        Self::assemble(config, store, sink, transport).await
    }

    /// Build with explicit adapters.
    pub async fn assemble(
        config: &Config,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ExecutionSink>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let monitor = EventMonitor::new(MonitorSettings::from_config(config), store, sink);

        for owner in &config.triggers {
            monitor.set_triggers(&owner.owner_id, owner.triggers.clone()).await;
        }

        let connection = if config.connection.enabled {
            let raw_sink: Arc<dyn RawEventSink> = monitor.clone();
            let manager = ConnectionManager::new(ConnectionSettings::from(&config.connection), transport, raw_sink);
            for subscription in &config.subscriptions {
                manager.add_subscription(subscription.clone()).await;
            }
            Some(manager)
        } else {
            None
        };

        tracing::info!(
            owners = config.triggers.len(),
            subscriptions = config.subscriptions.len(),
            connection = connection.is_some(),
            "Runtime assembled"
        );

        Ok(Self { monitor, connection })
    }

    pub fn monitor(&self) -> &Arc<EventMonitor> {
        &self.monitor
    }

    pub fn connection(&self) -> Option<&ConnectionManager> {
        self.connection.as_ref()
    }

    pub async fn start(&self) -> Result<()> {
        self.monitor
            .start()
            .await
            .context("Failed to start dispatch queues")?;
        if let Some(connection) = &self.connection {
            connection.start().await;
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<RuntimeStats> {
        let monitor = self.monitor.stats().await.context("Failed to read queue state")?;
        let (subscriptions, connection_state) = match &self.connection {
            Some(connection) => {
                let active = connection
                    .subscriptions()
                    .await
                    .iter()
                    .filter(|s| s.is_active)
                    .count();
                (active, Some(connection.state()))
            }
            None => (0, None),
        };

        Ok(RuntimeStats {
            monitor,
            subscriptions,
            connected: connection_state == Some(ConnectionState::Connected),
            connection_state,
        })
    }

    /// Stop the connection first so no new events arrive, then the queues.
    pub async fn stop(&self) {
        if let Some(connection) = &self.connection {
            connection.stop().await;
        }
        self.monitor.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChannelTransport;
    use crate::domain::models::{EventType, OwnerTriggers, Subscription, Trigger};
    use crate::services::ConnectionState;

    #[tokio::test]
    async fn test_memory_backend_and_log_sink_by_default() {
        let config = Config::default();
        let runtime = Runtime::build(&config).await.unwrap();

        assert!(runtime.connection().is_none());
        let stats = runtime.monitor().stats().await.unwrap();
        assert_eq!(stats.owners, 0);
    }

    #[tokio::test]
    async fn test_sqlite_backend_opens_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.queue.backend = QueueBackendKind::Sqlite;
        config.queue.database_path = dir.path().join("nested/jobs.db").display().to_string();

        let store = build_store(&config.queue).await.unwrap();
        assert_eq!(store.counts("execution").await.unwrap(), crate::domain::ports::JobCounts::default());
        assert!(dir.path().join("nested/jobs.db").exists());
    }

    #[test]
    fn test_http_sink_selected_with_endpoint() {
        let config = ExecutionConfig {
            endpoint: Some("http://127.0.0.1:9/exec".to_string()),
            timeout_ms: 100,
        };
        assert!(build_sink(&config).is_ok());
    }

    #[tokio::test]
    async fn test_config_triggers_and_subscriptions_loaded() {
        let mut config = Config::default();
        config.connection.enabled = true;
        config.connection.url = "ws://feed.test".to_string();
        config.subscriptions.push(Subscription::new("vault", "Addr111"));
        config.triggers.push(OwnerTriggers {
            owner_id: "agent-1".to_string(),
            triggers: vec![Trigger::new("t1", "", EventType::Deposit)],
        });

        let (transport, _servers) = ChannelTransport::new();
        let runtime = Runtime::assemble(
            &config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(LogExecutionSink),
            Arc::new(transport),
        )
        .await
        .unwrap();

        let triggers = runtime.monitor().triggers_for("agent-1").await;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].owner_id, "agent-1");

        let connection = runtime.connection().unwrap();
        assert_eq!(connection.subscriptions().await.len(), 1);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stats_join_monitor_and_connection() {
        let mut config = Config::default();
        config.connection.enabled = true;
        config.connection.url = "ws://feed.test".to_string();
        config.subscriptions.push(Subscription::new("vault", "Addr111"));
        config.subscriptions.push(Subscription::new("paused", "Addr222").inactive());
        config.triggers.push(OwnerTriggers {
            owner_id: "agent-1".to_string(),
            triggers: vec![
                Trigger::new("t1", "", EventType::Deposit),
                Trigger::new("t2", "", EventType::Swap).inactive(),
            ],
        });

        let (transport, mut accepted) = ChannelTransport::new();
        let runtime = Runtime::assemble(
            &config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(LogExecutionSink),
            Arc::new(transport),
        )
        .await
        .unwrap();

        let deposit = serde_json::json!({"type": "deposit", "timestamp": 1_700_000_000, "data": {"amount": 1}});
        runtime
            .monitor()
            .ingest(&[deposit.clone(), deposit, serde_json::json!({"type": "deposit"})])
            .await;

        let stats = runtime.stats().await.unwrap();
        assert_eq!(stats.monitor.received, 3);
        assert_eq!(stats.monitor.processed, 1);
        assert_eq!(stats.monitor.failed, 1);
        assert_eq!(stats.monitor.buffered, 1);
        assert_eq!(stats.monitor.active_triggers, 1);
        assert_eq!(stats.subscriptions, 1);
        assert!(!stats.connected);
        assert_eq!(stats.connection_state, Some(ConnectionState::Disconnected));

        runtime.start().await.unwrap();
        let _server = tokio::time::timeout(Duration::from_secs(2), accepted.recv())
            .await
            .unwrap()
            .unwrap();
        let mut state = runtime.connection().unwrap().state_changes();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        let stats = runtime.stats().await.unwrap();
        assert!(stats.connected);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["received"], 3);
        assert_eq!(json["connected"], true);
        assert_eq!(json["subscriptions"], 1);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_stats_without_connection() {
        let runtime = Runtime::build(&Config::default()).await.unwrap();
        let stats = runtime.stats().await.unwrap();
        assert_eq!(stats.subscriptions, 0);
        assert!(!stats.connected);
        assert_eq!(stats.connection_state, None);
    }
}
