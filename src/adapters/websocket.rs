//! WebSocket transport over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::domain::errors::ConnectionError;
use crate::domain::ports::{Connection, Transport};

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, ConnectionError> {
        let parsed = Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidUrl(format!("{url}: expected ws:// or wss://")));
        }

        let (stream, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;
        tracing::debug!(url, "WebSocket handshake complete");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!("Skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(ConnectionError::SendFailed(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(ConnectionError::ReceiveFailed(e.to_string()))),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
