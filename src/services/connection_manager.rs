//! Self-healing real-time connection to the event source.
//!
//! A single background task owns the live [`Connection`]. It connects with
//! a bounded timeout, re-issues every active subscription, forwards account
//! notifications to a [`RawEventSink`], pings on a heartbeat, and on any
//! failure schedules a reconnect after `reconnect_interval * attempt`. Once
//! the attempt budget is spent it emits [`ConnectionSignal::Exhausted`] and
//! stays down until restarted.
//!
//! Nothing here fails the host: connectivity problems surface only as state
//! changes, signals and logs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::errors::ConnectionError;
use crate::domain::models::{ConnectionConfig, Subscription};
use crate::domain::ports::{Connection, RawEventSink, Transport};

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Observable connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    Started,
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget spent; no further attempts until restarted.
    Exhausted,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub commitment: String,
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms.max(1)),
            commitment: config.commitment.clone(),
        }
    }
}

enum Command {
    Subscribe(Subscription),
    Unsubscribe(String),
}

/// Remembered `(subscription, slot)` stamps.
const SLOT_CLOCK_CAPACITY: usize = 4096;

/// First-seen times of recent notifications, keyed by subscription and slot.
///
/// Notifications carry no wall-clock time of their own. Stamping each one
/// with the time its slot was first seen keeps a redelivery (after a
/// reconnect or resubscribe) identical to the original, so it fingerprints
/// the same and is dropped as a duplicate.
#[derive(Debug, Default)]
struct SlotClock {
    stamps: HashMap<(String, u64), i64>,
    order: VecDeque<(String, u64)>,
}

impl SlotClock {
    fn stamp(&mut self, subscription_id: &str, slot: Option<u64>, now_ms: i64) -> i64 {
        let Some(slot) = slot else {
            return now_ms;
        };
        let key = (subscription_id.to_string(), slot);
        if let Some(first_seen) = self.stamps.get(&key) {
            return *first_seen;
        }

        self.stamps.insert(key.clone(), now_ms);
        self.order.push_back(key);
        while self.order.len() > SLOT_CLOCK_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.stamps.remove(&oldest);
            }
        }
        now_ms
    }
}

/// Shared between the manager handle and its background task.
struct Shared {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn RawEventSink>,
    subscriptions: RwLock<Vec<Subscription>>,
    state: watch::Sender<ConnectionState>,
    signals: broadcast::Sender<ConnectionSignal>,
    slot_clock: Mutex<SlotClock>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, signal: ConnectionSignal) {
        // No subscribers is fine.
        let _ = self.signals.send(signal);
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn RawEventSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (signals, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                sink,
                subscriptions: RwLock::new(Vec::new()),
                state,
                signals,
                slot_clock: Mutex::new(SlotClock::default()),
            }),
            commands: Mutex::new(None),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.shared.signals.subscribe()
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.shared.subscriptions.read().await.clone()
    }

    /// Register (or replace, by id) a subscription. When connected the
    /// subscribe request goes out immediately; otherwise it is issued on the
    /// next connect.
    pub async fn add_subscription(&self, subscription: Subscription) {
        {
            let mut subs = self.shared.subscriptions.write().await;
            match subs.iter_mut().find(|s| s.id == subscription.id) {
                Some(existing) => *existing = subscription.clone(),
                None => subs.push(subscription.clone()),
            }
        }
        self.send_command(Command::Subscribe(subscription)).await;
    }

    /// Forget a subscription, unsubscribing on the live connection.
    pub async fn remove_subscription(&self, subscription_id: &str) -> bool {
        let removed = {
            let mut subs = self.shared.subscriptions.write().await;
            let before = subs.len();
            subs.retain(|s| s.id != subscription_id);
            subs.len() != before
        };
        if removed {
            self.send_command(Command::Unsubscribe(subscription_id.to_string())).await;
        }
        removed
    }

    async fn send_command(&self, command: Command) {
        if let Some(tx) = self.commands.lock().await.as_ref() {
            // The task may already have exited after exhausting reconnects.
            let _ = tx.send(command);
        }
    }

    /// Spawn the connection task. Never fails because the feed is down;
    /// starting an already running manager is a no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock().await = Some(tx);
        self.shutdown.send_replace(false);

        tracing::info!(url = %self.shared.settings.url, "Connection manager started");
        self.shared.emit(ConnectionSignal::Started);

        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run_connection(shared, rx, shutdown)));
    }

    /// Stop reconnecting and heartbeating and close the live connection.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.commands.lock().await.take();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Connection task ended abnormally");
            }
        }
        self.shared.set_state(ConnectionState::Stopped);
        self.shared.emit(ConnectionSignal::Stopped);
        tracing::info!("Connection manager stopped");
    }
}

/// Why a live session ended.
enum SessionEnd {
    Stopped,
    Lost(String),
}

async fn run_connection(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let settings = &shared.settings;
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        shared.set_state(ConnectionState::Connecting);
        let connected = tokio::time::timeout(settings.connect_timeout, shared.transport.connect(&settings.url)).await;

        let reason = match connected {
            Ok(Ok(conn)) => {
                attempt = 0;
                shared.set_state(ConnectionState::Connected);
                shared.emit(ConnectionSignal::Connected);
                tracing::info!(url = %settings.url, "Connected to event source");

                let mut session = Session::new(&shared, conn);
                match session.run(&mut commands, &mut shutdown).await {
                    SessionEnd::Stopped => return,
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => ConnectionError::Timeout(settings.connect_timeout.as_millis() as u64).to_string(),
        };

        shared.set_state(ConnectionState::Disconnected);
        shared.emit(ConnectionSignal::Disconnected { reason: reason.clone() });
        tracing::warn!(url = %settings.url, reason = %reason, "Event source connection lost");

        attempt += 1;
        if attempt > settings.max_reconnect_attempts {
            tracing::error!(
                attempts = settings.max_reconnect_attempts,
                "Reconnect attempts exhausted, giving up"
            );
            shared.emit(ConnectionSignal::Exhausted);
            return;
        }

        let delay = settings.reconnect_interval.saturating_mul(attempt);
        shared.set_state(ConnectionState::Reconnecting);
        shared.emit(ConnectionSignal::Reconnecting { attempt, delay });
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// What woke the session loop.
enum Wake {
    Stop,
    Command(Option<Command>),
    Heartbeat,
    Frame(Option<Result<String, ConnectionError>>),
}

/// Subscribe request awaiting its acknowledgement.
enum PendingRequest {
    Subscribe(String),
    Unsubscribe,
}

/// One live connection and its JSON-RPC bookkeeping.
struct Session<'a> {
    shared: &'a Shared,
    conn: Box<dyn Connection>,
    next_request_id: u64,
    pending: HashMap<u64, PendingRequest>,
    /// Server subscription id -> our subscription.
    active: HashMap<u64, Subscription>,
}

impl<'a> Session<'a> {
    fn new(shared: &'a Shared, conn: Box<dyn Connection>) -> Self {
        Self {
            shared,
            conn,
            next_request_id: 1,
            pending: HashMap::new(),
            active: HashMap::new(),
        }
    }

    async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        // The subscription list is authoritative on connect; commands queued
        // while disconnected are already reflected in it.
        while commands.try_recv().is_ok() {}

        let subscriptions = self.shared.subscriptions.read().await.clone();
        for subscription in subscriptions {
            if let Err(reason) = self.subscribe(&subscription).await {
                return SessionEnd::Lost(reason);
            }
        }

        let period = self.shared.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Stop,
                command = commands.recv() => Wake::Command(command),
                _ = heartbeat.tick() => Wake::Heartbeat,
                frame = self.conn.recv() => Wake::Frame(frame),
            };

            match wake {
                Wake::Stop | Wake::Command(None) => {
                    self.conn.close().await;
                    return SessionEnd::Stopped;
                }
                Wake::Command(Some(Command::Subscribe(subscription))) => {
                    if let Err(reason) = self.resubscribe(&subscription).await {
                        return SessionEnd::Lost(reason);
                    }
                }
                Wake::Command(Some(Command::Unsubscribe(id))) => {
                    if let Err(reason) = self.unsubscribe(&id).await {
                        return SessionEnd::Lost(reason);
                    }
                }
                Wake::Heartbeat => match self.conn.ping().await {
                    Ok(()) => tracing::debug!(subscriptions = self.active.len(), "Connection alive"),
                    Err(e) => {
                        self.conn.close().await;
                        return SessionEnd::Lost(format!("heartbeat failed: {e}"));
                    }
                },
                Wake::Frame(None) => return SessionEnd::Lost("closed by peer".to_string()),
                Wake::Frame(Some(Err(e))) => {
                    self.conn.close().await;
                    return SessionEnd::Lost(e.to_string());
                }
                Wake::Frame(Some(Ok(text))) => self.handle_message(&text).await,
            }
        }
    }

    async fn send_request(&mut self, method: &str, params: JsonValue, pending: PendingRequest) -> Result<(), String> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        self.conn.send(request.to_string()).await.map_err(|e| e.to_string())?;
        self.pending.insert(id, pending);
        Ok(())
    }

    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), String> {
        if !subscription.is_active {
            return Ok(());
        }
        let params = json!([
            subscription.target_address,
            {"encoding": "jsonParsed", "commitment": self.shared.settings.commitment}
        ]);
        tracing::debug!(subscription_id = %subscription.id, address = %subscription.target_address, "Subscribing");
        self.send_request("accountSubscribe", params, PendingRequest::Subscribe(subscription.id.clone()))
            .await
    }

    async fn resubscribe(&mut self, subscription: &Subscription) -> Result<(), String> {
        self.unsubscribe(&subscription.id).await?;
        self.subscribe(subscription).await
    }

    async fn unsubscribe(&mut self, subscription_id: &str) -> Result<(), String> {
        let server_ids: Vec<u64> = self
            .active
            .iter()
            .filter(|(_, s)| s.id == subscription_id)
            .map(|(sid, _)| *sid)
            .collect();

        for server_id in server_ids {
            self.active.remove(&server_id);
            self.send_request("accountUnsubscribe", json!([server_id]), PendingRequest::Unsubscribe)
                .await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, text: &str) {
        let message: JsonValue = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring non-JSON frame");
                return;
            }
        };

        if message.get("method").and_then(JsonValue::as_str) == Some("accountNotification") {
            self.handle_notification(&message).await;
            return;
        }

        let Some(request_id) = message.get("id").and_then(JsonValue::as_u64) else {
            tracing::debug!("Ignoring unsolicited message");
            return;
        };

        match self.pending.remove(&request_id) {
            Some(PendingRequest::Subscribe(subscription_id)) => {
                if let Some(error) = message.get("error") {
                    tracing::warn!(%subscription_id, %error, "Subscribe request rejected");
                    return;
                }
                let Some(server_id) = message.get("result").and_then(JsonValue::as_u64) else {
                    tracing::warn!(%subscription_id, "Subscribe acknowledgement without id");
                    return;
                };
                let subscriptions = self.shared.subscriptions.read().await;
                // Removed while the request was in flight.
                if let Some(subscription) = subscriptions.iter().find(|s| s.id == subscription_id) {
                    self.active.insert(server_id, subscription.clone());
                    tracing::info!(%subscription_id, server_id, "Subscription active");
                }
            }
            Some(PendingRequest::Unsubscribe) => {
                if let Some(error) = message.get("error") {
                    tracing::warn!(%error, "Unsubscribe request rejected");
                }
            }
            None => tracing::debug!(request_id, "Response for unknown request"),
        }
    }

    async fn handle_notification(&self, message: &JsonValue) {
        let params = message.get("params").cloned().unwrap_or(JsonValue::Null);
        let Some(server_id) = params.get("subscription").and_then(JsonValue::as_u64) else {
            tracing::warn!("Notification without subscription id");
            return;
        };
        let Some(subscription) = self.active.get(&server_id) else {
            tracing::debug!(server_id, "Notification for unknown subscription");
            return;
        };

        let slot = params.pointer("/result/context/slot").and_then(JsonValue::as_u64);
        let observed_at = self
            .shared
            .slot_clock
            .lock()
            .await
            .stamp(&subscription.id, slot, Utc::now().timestamp_millis());

        let raw = account_update_payload(subscription, &params, observed_at);
        self.shared.sink.accept(raw).await;
    }
}

/// Raw payload synthesized from an `accountNotification`, stamped with
/// `observed_at` epoch milliseconds. The slot doubles as the change
/// descriptor so two slots with identical account data stay distinct.
pub fn account_update_payload(subscription: &Subscription, params: &JsonValue, observed_at: i64) -> JsonValue {
    let result = params.get("result");
    let slot = result
        .and_then(|r| r.pointer("/context/slot"))
        .cloned()
        .unwrap_or(JsonValue::Null);
    let data = result
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(JsonValue::Null);

    json!({
        "type": "account_update",
        "account": subscription.target_address,
        "subscriptionId": subscription.id,
        "subscriptionName": subscription.name,
        "eventTypes": subscription.event_types,
        "slot": slot,
        "change": {"slot": slot},
        "timestamp": observed_at,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::channel_transport::ChannelTransport;
    use crate::domain::models::EventType;
    use async_trait::async_trait;

    struct ChannelSink(mpsc::UnboundedSender<JsonValue>);

    #[async_trait]
    impl RawEventSink for ChannelSink {
        async fn accept(&self, raw: JsonValue) {
            let _ = self.0.send(raw);
        }
    }

    fn settings(max_reconnect_attempts: u32) -> ConnectionSettings {
        ConnectionSettings {
            url: "mem://feed".to_string(),
            connect_timeout: Duration::from_millis(200),
            reconnect_interval: Duration::from_millis(2),
            max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(60),
            commitment: "confirmed".to_string(),
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    async fn next_signal(rx: &mut broadcast::Receiver<ConnectionSignal>) -> ConnectionSignal {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_account_update_payload() {
        let subscription = Subscription::new("sub-1", "Wallet9")
            .with_name("treasury")
            .with_event_type(EventType::Deposit);
        let params = json!({
            "subscription": 7,
            "result": {"context": {"slot": 42}, "value": {"lamports": 10}}
        });

        let raw = account_update_payload(&subscription, &params, 1_700_000_000_000);
        assert_eq!(raw["type"], "account_update");
        assert_eq!(raw["account"], "Wallet9");
        assert_eq!(raw["subscriptionId"], "sub-1");
        assert_eq!(raw["subscriptionName"], "treasury");
        assert_eq!(raw["eventTypes"], json!(["deposit"]));
        assert_eq!(raw["slot"], 42);
        assert_eq!(raw["data"], json!({"lamports": 10}));
        assert_eq!(raw["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(raw["change"], json!({"slot": 42}));
    }

    #[test]
    fn test_slot_clock_reuses_first_stamp() {
        let mut clock = SlotClock::default();
        assert_eq!(clock.stamp("sub-1", Some(42), 1_000), 1_000);
        assert_eq!(clock.stamp("sub-1", Some(42), 9_000), 1_000);
        assert_eq!(clock.stamp("sub-2", Some(42), 9_000), 9_000);
        assert_eq!(clock.stamp("sub-1", Some(43), 9_500), 9_500);
        assert_eq!(clock.stamp("sub-1", None, 10_000), 10_000);
        assert_eq!(clock.stamp("sub-1", None, 11_000), 11_000);
    }

    #[test]
    fn test_slot_clock_is_bounded() {
        let mut clock = SlotClock::default();
        for slot in 0..(SLOT_CLOCK_CAPACITY as u64 + 10) {
            clock.stamp("sub-1", Some(slot), slot as i64);
        }
        assert_eq!(clock.stamps.len(), SLOT_CLOCK_CAPACITY);
        assert_eq!(clock.order.len(), SLOT_CLOCK_CAPACITY);
        assert_eq!(clock.stamp("sub-1", Some(0), 99), 99, "evicted slot is stamped afresh");
    }

    #[tokio::test]
    async fn test_redelivered_notification_keeps_its_fingerprint() {
        let (transport, mut accepted) = ChannelTransport::new();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(settings(3), Arc::new(transport), Arc::new(ChannelSink(sink_tx)));
        manager.add_subscription(Subscription::new("sub-1", "Wallet9")).await;
        manager.start().await;

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {"subscription": 5, "result": {"context": {"slot": 900}, "value": {"lamports": 3}}}
        });

        let mut first = accepted.recv().await.unwrap();
        let request = first.next_frame(WAIT).await.unwrap();
        first.push(json!({"jsonrpc": "2.0", "id": request["id"], "result": 5}));
        first.push(notification.clone());
        let original = tokio::time::timeout(WAIT, sink_rx.recv()).await.unwrap().unwrap();
        drop(first);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut second = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
        let request = second.next_frame(WAIT).await.unwrap();
        second.push(json!({"jsonrpc": "2.0", "id": request["id"], "result": 5}));
        second.push(notification);
        let redelivery = tokio::time::timeout(WAIT, sink_rx.recv()).await.unwrap().unwrap();

        assert_eq!(original["timestamp"], redelivery["timestamp"]);
        assert_eq!(
            crate::services::deduplicator::fingerprint(&original),
            crate::services::deduplicator::fingerprint(&redelivery)
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_subscribe_and_forward_notifications() {
        let (transport, mut accepted) = ChannelTransport::new();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(settings(3), Arc::new(transport), Arc::new(ChannelSink(sink_tx)));
        manager.add_subscription(Subscription::new("sub-1", "Wallet9")).await;

        manager.start().await;
        let mut server = accepted.recv().await.unwrap();

        let request = server.next_frame(WAIT).await.unwrap();
        assert_eq!(request["method"], "accountSubscribe");
        assert_eq!(request["params"][0], "Wallet9");
        assert_eq!(request["params"][1]["commitment"], "confirmed");

        server.push(json!({"jsonrpc": "2.0", "id": request["id"], "result": 99}));
        server.push(json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {"subscription": 99, "result": {"context": {"slot": 5}, "value": {"lamports": 1}}}
        }));

        let raw = tokio::time::timeout(WAIT, sink_rx.recv()).await.unwrap().unwrap();
        assert_eq!(raw["subscriptionId"], "sub-1");
        assert_eq!(raw["slot"], 5);
        assert_eq!(manager.state(), ConnectionState::Connected);

        assert!(manager.remove_subscription("sub-1").await);
        let unsubscribe = server.next_frame(WAIT).await.unwrap();
        assert_eq!(unsubscribe["method"], "accountUnsubscribe");
        assert_eq!(unsubscribe["params"], json!([99]));

        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_reconnect_reissues_subscriptions() {
        let (transport, mut accepted) = ChannelTransport::new();
        let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(settings(3), Arc::new(transport), Arc::new(ChannelSink(sink_tx)));
        manager.add_subscription(Subscription::new("sub-1", "Wallet9")).await;
        let mut signals = manager.signals();

        manager.start().await;
        let mut first = accepted.recv().await.unwrap();
        assert_eq!(first.next_frame(WAIT).await.unwrap()["method"], "accountSubscribe");
        drop(first);

        let mut second = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
        assert_eq!(second.next_frame(WAIT).await.unwrap()["method"], "accountSubscribe");

        assert_eq!(next_signal(&mut signals).await, ConnectionSignal::Started);
        assert_eq!(next_signal(&mut signals).await, ConnectionSignal::Connected);
        assert!(matches!(next_signal(&mut signals).await, ConnectionSignal::Disconnected { .. }));
        assert_eq!(
            next_signal(&mut signals).await,
            ConnectionSignal::Reconnecting { attempt: 1, delay: Duration::from_millis(2) }
        );
        assert_eq!(next_signal(&mut signals).await, ConnectionSignal::Connected);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failed_heartbeat_drops_connection() {
        let (transport, mut accepted) = ChannelTransport::new();
        let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
        let mut config = settings(3);
        config.heartbeat_interval = Duration::from_millis(10);
        let manager = ConnectionManager::new(config, Arc::new(transport), Arc::new(ChannelSink(sink_tx)));
        let mut signals = manager.signals();

        manager.start().await;
        let server = accepted.recv().await.unwrap();
        server.fail_pings();

        assert_eq!(next_signal(&mut signals).await, ConnectionSignal::Started);
        assert_eq!(next_signal(&mut signals).await, ConnectionSignal::Connected);
        match next_signal(&mut signals).await {
            ConnectionSignal::Disconnected { reason } => assert!(reason.contains("heartbeat")),
            other => panic!("unexpected signal {other:?}"),
        }
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_fires_once() {
        let (transport, _accepted) = ChannelTransport::new();
        transport.set_refusing(true);
        let transport = Arc::new(transport);
        let (sink_tx, _sink_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(settings(3), transport.clone(), Arc::new(ChannelSink(sink_tx)));
        let mut signals = manager.signals();

        manager.start().await;

        let mut reconnects = Vec::new();
        loop {
            match next_signal(&mut signals).await {
                ConnectionSignal::Reconnecting { attempt, delay } => reconnects.push((attempt, delay)),
                ConnectionSignal::Exhausted => break,
                _ => {}
            }
        }

        assert_eq!(
            reconnects,
            vec![
                (1, Duration::from_millis(2)),
                (2, Duration::from_millis(4)),
                (3, Duration::from_millis(6)),
            ]
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.connect_count(), 4);
        assert!(signals.try_recv().is_err(), "nothing after Exhausted");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
