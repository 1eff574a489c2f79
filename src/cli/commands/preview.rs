//! `tripwire preview`: normalize and match a batch without touching any
//! queue, dedup window or buffer.

use anyhow::Result;
use comfy_table::Cell;
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::{InMemoryJobStore, LogExecutionSink, WebSocketTransport};
use crate::application::Runtime;
use crate::cli::commands::read_batch;
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::cli::types::PreviewArgs;
use crate::domain::models::Config;
use crate::services::PreviewMatch;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOutput {
    pub received: usize,
    pub normalized: usize,
    pub events: Vec<PreviewMatch>,
}

impl CommandOutput for PreviewOutput {
    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return format!("No events normalized from {} item(s).", self.received);
        }

        let mut t = table(["EVENT", "TYPE", "TIMESTAMP", "SIGNATURE", "MATCHES"]);
        for preview in &self.events {
            let matches = if preview.matches.is_empty() {
                "-".to_string()
            } else {
                preview
                    .matches
                    .iter()
                    .map(|m| format!("{}/{}", m.owner_id, m.trigger_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            t.add_row(vec![
                Cell::new(truncate(&preview.event.id, 24)),
                Cell::new(preview.event.event_type),
                Cell::new(preview.event.timestamp.to_rfc3339()),
                Cell::new(truncate(&preview.event.source_signature, 16)),
                Cell::new(matches),
            ]);
        }

        format!(
            "Normalized {} of {} item(s):\n{t}",
            self.normalized, self.received
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: PreviewArgs, mut config: Config, json_mode: bool) -> Result<()> {
    let batch = read_batch(&args.file)?;

    // Preview never dispatches or connects, so an in-memory store is enough
    // even when the configured backend is durable.
    config.connection.enabled = false;
    let runtime = Runtime::assemble(
        &config,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(LogExecutionSink),
        Arc::new(WebSocketTransport::new()),
    )
    .await?;

    let events = runtime.monitor().preview_matches(&batch).await;
    output(
        &PreviewOutput {
            received: batch.len(),
            normalized: events.len(),
            events,
        },
        json_mode,
    );
    Ok(())
}
