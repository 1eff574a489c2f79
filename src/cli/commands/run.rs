//! `tripwire run`: start the monitor (and the live connection when enabled)
//! and keep it running until Ctrl-C.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::{Runtime, RuntimeStats};
use crate::cli::commands::parse_batch;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::RunArgs;
use crate::domain::models::Config;
use crate::services::EventMonitor;

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub stats: RuntimeStats,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let s = &self.stats.monitor;
        [
            "Tripwire stopped.".to_string(),
            format!("  received:   {}", s.received),
            format!("  processed:  {}", s.processed),
            format!("  duplicates: {}", s.duplicates),
            format!("  failed:     {}", s.failed),
            format!("  matched:    {}", s.matched),
            format!("  rule errors: {}", s.rule_errors),
            format!(
                "  executions: {} completed, {} failed, {} still queued",
                s.execution_jobs.completed,
                s.execution_jobs.failed,
                s.execution_jobs.active()
            ),
            format!(
                "  buffered:   {} of {}; {} active trigger(s), {} subscription(s)",
                s.buffered, s.buffer_capacity, s.active_triggers, self.stats.subscriptions
            ),
        ]
        .join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::build(&config).await?;
    runtime.start().await?;
    tracing::info!(stdin = args.stdin, "Tripwire running; press Ctrl-C to stop");

    let reader = args
        .stdin
        .then(|| tokio::spawn(read_stdin(runtime.monitor().clone())));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    if let Some(reader) = reader {
        reader.abort();
    }
    runtime.stop().await;

    let stats = runtime.stats().await?;
    output(&RunOutput { stats }, json_mode);
    Ok(())
}

/// Submit each stdin line as a webhook batch until EOF.
async fn read_stdin(monitor: Arc<EventMonitor>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match parse_batch(&line) {
                Ok(batch) => {
                    if let Err(e) = monitor.submit(batch).await {
                        tracing::error!(error = %e, "Failed to enqueue stdin batch");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unparseable stdin line"),
            },
            Ok(None) => {
                tracing::info!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
}
