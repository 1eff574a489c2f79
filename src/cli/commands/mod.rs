//! CLI command implementations.

pub mod config;
pub mod ingest;
pub mod preview;
pub mod run;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::io::Read;
use std::path::Path;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load configuration from `path` when given, otherwise from `.tripwire/`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Read a batch of raw events from a JSON file, or stdin for `-`. A single
/// object is treated as a batch of one.
pub fn read_batch(path: &Path) -> Result<Vec<JsonValue>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read batch from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?
    };
    parse_batch(&text)
}

pub(crate) fn parse_batch(text: &str) -> Result<Vec<JsonValue>> {
    let value: JsonValue = serde_json::from_str(text).context("Batch is not valid JSON")?;
    Ok(match value {
        JsonValue::Array(items) => items,
        other => vec![other],
    })
}
