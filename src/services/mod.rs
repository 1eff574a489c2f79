//! Services: the ingestion pipeline, trigger matching, dispatch and the
//! real-time connection.

pub mod condition_evaluator;
pub mod connection_manager;
pub mod deduplicator;
pub mod dispatch_queue;
pub mod event_buffer;
pub mod event_monitor;
pub mod field_path;
pub mod normalizer;
pub mod trigger_registry;

pub use condition_evaluator::{evaluate, evaluate_condition};
pub use connection_manager::{ConnectionManager, ConnectionSettings, ConnectionSignal, ConnectionState};
pub use deduplicator::{fingerprint, DedupWindow};
pub use dispatch_queue::{DispatchQueue, QueueSettings, RetryPolicy};
pub use event_buffer::EventBuffer;
pub use event_monitor::{
    EventMonitor, IngestReport, MonitorSettings, MonitorSignal, MonitorStats, PreviewMatch,
    RejectReason, TriggerExecutionHandler, EXECUTE_JOB, INGEST_JOB,
};
pub use normalizer::Normalizer;
pub use trigger_registry::{RegistryStats, TriggerMatch, TriggerRegistry};
