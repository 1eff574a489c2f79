//! Domain layer for the Tripwire ingestion and dispatch core
//!
//! Event, trigger, subscription and job models, the ports the services
//! depend on, and the typed errors they raise.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ConditionError, ConnectionError, NormalizeError, QueueError, QueueResult};
