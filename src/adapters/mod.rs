//! Infrastructure adapters for external systems.

pub mod channel_transport;
pub mod execution;
pub mod memory;
pub mod sqlite;
pub mod websocket;

pub use channel_transport::{ChannelTransport, ServerEnd};
pub use execution::{HttpExecutionSink, LogExecutionSink};
pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use websocket::WebSocketTransport;
