//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - JobStore: Durable or in-process storage for dispatch jobs
//! - JobHandler: Executes one job kind pulled by the dispatch queue
//! - ExecutionSink: External executor invoked once per trigger match
//! - Transport / Connection: Duplex link to the real-time event source
//! - RawEventSink: Receiver of raw payloads synthesized from push messages

pub mod event_sink;
pub mod execution_sink;
pub mod job_handler;
pub mod job_store;
pub mod transport;

pub use event_sink::RawEventSink;
pub use execution_sink::ExecutionSink;
pub use job_handler::JobHandler;
pub use job_store::{JobCounts, JobStore, Recovered};
pub use transport::{Connection, Transport};
