use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::subscription::Subscription;
use super::trigger::OwnerTriggers;

/// Main configuration structure for Tripwire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Real-time connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Dedup window and event buffer sizing
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Dispatch queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Where matched triggers are executed
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Accounts to watch once the connection is up
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,

    /// Trigger rules, grouped by owner
    #[serde(default)]
    pub triggers: Vec<OwnerTriggers>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            connection: ConnectionConfig::default(),
            ingestion: IngestionConfig::default(),
            queue: QueueConfig::default(),
            execution: ExecutionConfig::default(),
            subscriptions: vec![],
            triggers: vec![],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation policy for file output (daily, hourly, never)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Real-time connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Whether `run` opens the live connection at all
    #[serde(default)]
    pub enabled: bool,

    /// WebSocket endpoint
    #[serde(default = "default_connection_url")]
    pub url: String,

    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Base reconnect delay; attempt N waits N times this
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Consecutive failures tolerated before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Heartbeat period while connected
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Commitment level requested on account subscriptions
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_connection_url() -> String {
    "wss://api.mainnet-beta.solana.com".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_reconnect_interval_ms() -> u64 {
    5_000
}

const fn default_max_reconnect_attempts() -> u32 {
    10
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_connection_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            commitment: default_commitment(),
        }
    }
}

/// Dedup window and event buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IngestionConfig {
    /// Number of recent fingerprints remembered
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// Number of recent canonical events retained
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

const fn default_dedup_window() -> usize {
    500
}

const fn default_buffer_capacity() -> usize {
    1_000
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Which job store backs the dispatch queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    Memory,
    Sqlite,
}

/// Dispatch queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    #[serde(default = "default_backend")]
    pub backend: QueueBackendKind,

    /// `SQLite` file used when `backend` is `sqlite`
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Workers for webhook batch ingestion
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,

    /// Workers for per-trigger execution
    #[serde(default = "default_execution_concurrency")]
    pub execution_concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Scheduler tick
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_backend() -> QueueBackendKind {
    QueueBackendKind::Memory
}

fn default_database_path() -> String {
    ".tripwire/jobs.db".to_string()
}

const fn default_ingest_concurrency() -> usize {
    4
}

const fn default_execution_concurrency() -> usize {
    8
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

const fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_path: default_database_path(),
            ingest_concurrency: default_ingest_concurrency(),
            execution_concurrency: default_execution_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Where matched triggers are executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    /// HTTP endpoint receiving execution requests; log-only when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout for the HTTP sink
    #[serde(default = "default_execution_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_execution_timeout_ms() -> u64 {
    10_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_execution_timeout_ms(),
        }
    }
}
