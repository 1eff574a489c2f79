//! In-process transport backed by tokio channels.
//!
//! Each successful `connect` hands the far end of the link to whoever holds
//! the [`ServerEnd`] receiver, which can then read client frames, push
//! messages, fail pings, or drop the link to simulate a disconnect. The
//! transport itself can refuse connects or leave them hanging.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::domain::errors::ConnectionError;
use crate::domain::ports::{Connection, Transport};

pub struct ChannelTransport {
    refusing: AtomicBool,
    hanging: AtomicBool,
    connects: AtomicU32,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl ChannelTransport {
    /// A transport plus the stream of server ends it accepts.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let transport = Self {
            refusing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            accepted,
        };
        (transport, rx)
    }

    /// Make every following connect attempt fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Make every following connect attempt never resolve (or resolve again).
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Connect attempts so far, successful or not.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectFailed(format!("{url} refused the connection")));
        }

        let (to_server, received) = mpsc::unbounded_channel();
        let (send, from_server) = mpsc::unbounded_channel();
        let ping_ok = Arc::new(AtomicBool::new(true));

        let server = ServerEnd { received, send, ping_ok: ping_ok.clone() };
        if self.accepted.send(server).is_err() {
            return Err(ConnectionError::ConnectFailed("no listener".to_string()));
        }

        Ok(Box::new(ChannelConnection { to_server, from_server, ping_ok }))
    }
}

struct ChannelConnection {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<String>,
    ping_ok: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.to_server
            .send(text)
            .map_err(|_| ConnectionError::SendFailed("server end dropped".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        if self.ping_ok.load(Ordering::SeqCst) && !self.to_server.is_closed() {
            Ok(())
        } else {
            Err(ConnectionError::SendFailed("ping failed".to_string()))
        }
    }

    async fn close(&mut self) {
        self.from_server.close();
    }
}

/// The server side of one accepted connection.
pub struct ServerEnd {
    received: mpsc::UnboundedReceiver<String>,
    send: mpsc::UnboundedSender<String>,
    ping_ok: Arc<AtomicBool>,
}

impl ServerEnd {
    /// Next frame the client sent, parsed as JSON. `None` on timeout, close,
    /// or a frame that is not JSON.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<JsonValue> {
        let text = tokio::time::timeout(wait, self.received.recv()).await.ok()??;
        serde_json::from_str(&text).ok()
    }

    pub fn push(&self, message: JsonValue) -> bool {
        self.send.send(message.to_string()).is_ok()
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.send.send(text.into()).is_ok()
    }

    /// Make the client's next heartbeat ping fail.
    pub fn fail_pings(&self) {
        self.ping_ok.store(false, Ordering::SeqCst);
    }
}
