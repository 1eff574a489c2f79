//! `tripwire config`: print the effective configuration.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    #[serde(flatten)]
    pub config: Config,
    #[serde(skip)]
    yaml: String,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        self.yaml.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

pub fn execute(config: Config, json_mode: bool) -> Result<()> {
    let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
    output(&ConfigOutput { config, yaml }, json_mode);
    Ok(())
}
