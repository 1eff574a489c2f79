//! Transport port for the real-time event source.

use async_trait::async_trait;

use crate::domain::errors::ConnectionError;

/// Opens duplex text connections to the event source.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// A live duplex connection carrying text frames.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;

    /// Liveness check. Fails when the write half is already dead.
    async fn ping(&mut self) -> Result<(), ConnectionError>;

    /// Close politely; errors are ignored.
    async fn close(&mut self);
}
