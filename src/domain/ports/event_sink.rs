use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Receives raw payloads synthesized from connection push messages and
/// routes them through the same dedup/normalize path as webhook events.
#[async_trait]
pub trait RawEventSink: Send + Sync {
    async fn accept(&self, raw: JsonValue);
}
