//! Execution sinks invoked once per trigger match.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::domain::models::CanonicalEvent;
use crate::domain::ports::ExecutionSink;

/// Logs each execution and succeeds. The default when no endpoint is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExecutionSink;

#[async_trait]
impl ExecutionSink for LogExecutionSink {
    async fn execute(&self, owner_id: &str, trigger_id: &str, event: &CanonicalEvent) -> anyhow::Result<()> {
        tracing::info!(
            owner_id,
            trigger_id,
            event_id = %event.id,
            event_type = %event.event_type,
            "Trigger executed"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionRequest<'a> {
    owner_id: &'a str,
    trigger_id: &'a str,
    event: &'a CanonicalEvent,
}

/// POSTs `{ownerId, triggerId, event}` as JSON to a fixed endpoint. Any
/// non-2xx response is an error, which makes the dispatch queue retry.
#[derive(Debug, Clone)]
pub struct HttpExecutionSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExecutionSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for execution sink")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExecutionSink for HttpExecutionSink {
    async fn execute(&self, owner_id: &str, trigger_id: &str, event: &CanonicalEvent) -> anyhow::Result<()> {
        let body = ExecutionRequest { owner_id, trigger_id, event };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach execution endpoint {}", self.endpoint))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(owner_id, trigger_id, status = %status, "Execution delivered");
            return Ok(());
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        anyhow::bail!("Execution endpoint returned {status}: {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EventType;
    use chrono::{TimeZone, Utc};
    use mockito::{Matcher, Server};
    use serde_json::{json, Map};

    fn sample_event() -> CanonicalEvent {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        CanonicalEvent {
            id: CanonicalEvent::derive_id(EventType::Deposit, ts, "fp"),
            event_type: EventType::Deposit,
            timestamp: ts,
            source_signature: "sig".to_string(),
            parsed_data: Map::new(),
            processed: true,
            processing_error: None,
        }
    }

    #[tokio::test]
    async fn test_http_sink_posts_match() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/execute")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "ownerId": "agent-1",
                "triggerId": "t1",
                "event": {"type": "deposit", "sourceSignature": "sig"}
            })))
            .with_status(202)
            .create_async()
            .await;

        let sink = HttpExecutionSink::new(format!("{}/hooks/execute", server.url()), Duration::from_secs(5)).unwrap();
        sink.execute("agent-1", "t1", &sample_event()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_sink_error_status_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/exec")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let sink = HttpExecutionSink::new(format!("{}/exec", server.url()), Duration::from_secs(5)).unwrap();
        let err = sink.execute("a", "t", &sample_event()).await.unwrap_err();

        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_log_sink_succeeds() {
        assert!(LogExecutionSink.execute("a", "t", &sample_event()).await.is_ok());
    }
}
