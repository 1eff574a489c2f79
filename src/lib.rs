//! Tripwire - event ingestion and trigger dispatch
//!
//! Tripwire receives raw blockchain-style events from a live WebSocket
//! subscription or from webhook batches, drops recent duplicates, normalizes
//! them into canonical events, matches them against per-owner trigger rules,
//! and dispatches one execution job per match through a retrying queue.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): normalization, matching, dispatch and the connection manager
//! - **Adapters** (`adapters`): SQLite and in-memory job stores, WebSocket transport, execution sinks
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **Application Layer** (`application`): runtime wiring
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use tripwire::application::Runtime;
//! use tripwire::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let runtime = Runtime::build(&config).await?;
//!     runtime.start().await?;
//!     let report = runtime.monitor().ingest(&[serde_json::json!({"type": "swap", "timestamp": 1_700_000_000})]).await;
//!     println!("{report:?}");
//!     runtime.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::Runtime;
pub use domain::models::{
    CanonicalEvent, Condition, ConditionOperator, ConditionValue, Config, EventType, Job,
    JobStatus, LogicalOperator, OwnerTriggers, Subscription, Trigger,
};
pub use domain::ports::{Connection, ExecutionSink, JobHandler, JobStore, RawEventSink, Transport};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ConnectionManager, DispatchQueue, EventMonitor, IngestReport, MonitorSignal, TriggerRegistry,
};
