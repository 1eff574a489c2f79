//! `tripwire ingest`: push one batch through the full pipeline and wait for
//! the resulting executions.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::application::{Runtime, RuntimeStats};
use crate::cli::commands::read_batch;
use crate::cli::output::{output, table, CommandOutput};
use crate::cli::types::IngestArgs;
use crate::domain::models::Config;
use crate::services::IngestReport;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutput {
    pub report: IngestReport,
    pub stats: RuntimeStats,
    /// False when executions were still queued at the wait deadline.
    pub drained: bool,
}

impl CommandOutput for IngestOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let mut lines = vec![format!(
            "Received {}: {} processed, {} duplicate, {} failed, {} trigger match(es)",
            r.received, r.processed, r.duplicates, r.failed, r.matched
        )];

        for error in &r.errors {
            lines.push(format!("  ! {error}"));
        }

        let mut t = table(["QUEUE", "PENDING", "RUNNING", "COMPLETED", "FAILED"]);
        for (name, counts) in [
            ("execution", &self.stats.monitor.execution_jobs),
            ("ingestion", &self.stats.monitor.ingestion_jobs),
        ] {
            t.add_row(vec![
                name.to_string(),
                counts.pending.to_string(),
                counts.running.to_string(),
                counts.completed.to_string(),
                counts.failed.to_string(),
            ]);
        }
        lines.push(t.to_string());

        if !self.drained {
            lines.push("Timed out waiting for executions to finish.".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: IngestArgs, mut config: Config, json_mode: bool) -> Result<()> {
    let batch = read_batch(&args.file)?;

    config.connection.enabled = false;
    let runtime = Runtime::build(&config).await?;
    runtime.start().await?;

    let monitor = runtime.monitor();
    let report = monitor.ingest(&batch).await;
    let drained = monitor
        .wait_idle(Duration::from_secs(args.wait_secs))
        .await
        .context("Failed to read queue state")?;
    let stats = runtime.stats().await?;

    runtime.stop().await;

    output(&IngestOutput { report, stats, drained }, json_mode);
    Ok(())
}
