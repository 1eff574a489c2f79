use std::collections::HashSet;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;
use url::Url;

use crate::domain::models::config::{Config, QueueBackendKind};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty when the sqlite backend is selected")]
    EmptyDatabasePath,

    #[error("Invalid {0}: {1}. Must be at least 1")]
    InvalidConcurrency(&'static str, usize),

    #[error("Invalid max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid {0}: {1}. Must be at least 1")]
    InvalidCapacity(&'static str, usize),

    #[error("Invalid connection url: {0}")]
    InvalidConnectionUrl(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];
const ROTATIONS: [&str; 3] = ["daily", "hourly", "never"];

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .tripwire/config.yaml
    /// 3. .tripwire/local.yaml (optional local overrides)
    /// 4. Environment variables (TRIPWIRE_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still
    /// take precedence over the file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TRIPWIRE_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".tripwire/config.yaml"))
            .merge(Yaml::file(".tripwire/local.yaml"))
            .merge(Env::prefixed("TRIPWIRE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let logging = &config.logging;
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(logging.level.clone()));
        }
        if !LOG_FORMATS.contains(&logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(logging.format.clone()));
        }
        if !ROTATIONS.contains(&logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(logging.rotation.clone()));
        }

        let ingestion = &config.ingestion;
        if ingestion.dedup_window == 0 {
            return Err(ConfigError::InvalidCapacity("dedup_window", 0));
        }
        if ingestion.buffer_capacity == 0 {
            return Err(ConfigError::InvalidCapacity("buffer_capacity", 0));
        }

        let queue = &config.queue;
        if queue.backend == QueueBackendKind::Sqlite && queue.database_path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if queue.ingest_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency("ingest_concurrency", 0));
        }
        if queue.execution_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency("execution_concurrency", 0));
        }
        if queue.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(queue.max_attempts));
        }
        if queue.initial_backoff_ms > queue.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                queue.initial_backoff_ms,
                queue.max_backoff_ms,
            ));
        }

        let connection = &config.connection;
        if connection.enabled {
            let url = Url::parse(&connection.url)
                .map_err(|e| ConfigError::InvalidConnectionUrl(format!("{}: {e}", connection.url)))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidConnectionUrl(format!(
                    "{}: expected ws:// or wss://",
                    connection.url
                )));
            }
            if connection.heartbeat_interval_ms == 0 {
                return Err(ConfigError::ValidationFailed(
                    "connection.heartbeat_interval_ms must be positive".to_string(),
                ));
            }
        }

        if let Some(endpoint) = &config.execution.endpoint {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::ValidationFailed(format!("execution.endpoint '{endpoint}': {e}"))
            })?;
        }

        let mut subscription_ids = HashSet::new();
        for subscription in &config.subscriptions {
            if subscription.target_address.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Subscription '{}' has no target address",
                    subscription.id
                )));
            }
            if !subscription_ids.insert(subscription.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Duplicate subscription id '{}'",
                    subscription.id
                )));
            }
        }

        for owner in &config.triggers {
            if owner.owner_id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Trigger owner id cannot be empty".to_string(),
                ));
            }
            let mut ids = HashSet::new();
            for trigger in &owner.triggers {
                if !ids.insert(trigger.id.as_str()) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "Duplicate trigger id '{}' for owner '{}'",
                        trigger.id, owner.owner_id
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventType, OwnerTriggers, Subscription, Trigger};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingestion.dedup_window, 500);
        assert_eq!(config.ingestion.buffer_capacity, 1_000);
        assert_eq!(config.queue.backend, QueueBackendKind::Memory);
        assert!(!config.connection.enabled);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: pretty
queue:
  backend: sqlite
  database_path: /tmp/jobs.db
  max_attempts: 5
subscriptions:
  - id: vault
    targetAddress: So11111111111111111111111111111111111111112
    eventTypes: [deposit, withdrawal]
triggers:
  - ownerId: agent-1
    triggers:
      - id: big-deposit
        eventType: deposit
        cooldown: 60
        priority: 10
        conditions:
          - field: parsedData.amount
            operator: greater_than
            value: 100
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.queue.backend, QueueBackendKind::Sqlite);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.subscriptions.len(), 1);
        assert_eq!(config.subscriptions[0].event_types.len(), 2);
        let trigger = &config.triggers[0].triggers[0];
        assert_eq!(trigger.event_type, EventType::Deposit);
        assert_eq!(trigger.cooldown, Some(std::time::Duration::from_secs(60)));
        assert_eq!(trigger.conditions.len(), 1);
        ConfigLoader::validate(&config).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_logging() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidRotation(_))
        ));
    }

    #[test]
    fn test_validate_queue_settings() {
        let mut config = Config::default();
        config.queue.initial_backoff_ms = 10_000;
        config.queue.max_backoff_ms = 1_000;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(10_000, 1_000))
        ));

        let mut config = Config::default();
        config.queue.max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxAttempts(0))
        ));

        let mut config = Config::default();
        config.queue.execution_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency("execution_concurrency", 0))
        ));

        let mut config = Config::default();
        config.queue.backend = QueueBackendKind::Sqlite;
        config.queue.database_path = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = Config::default();
        config.ingestion.dedup_window = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidCapacity("dedup_window", 0))
        ));
    }

    #[test]
    fn test_connection_url_checked_only_when_enabled() {
        let mut config = Config::default();
        config.connection.url = "https://not-a-socket".to_string();
        ConfigLoader::validate(&config).unwrap();

        config.connection.enabled = true;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConnectionUrl(_))
        ));
    }

    #[test]
    fn test_duplicate_trigger_ids_rejected() {
        let mut config = Config::default();
        config.triggers.push(OwnerTriggers {
            owner_id: "agent-1".to_string(),
            triggers: vec![
                Trigger::new("t1", "agent-1", EventType::Swap),
                Trigger::new("t1", "agent-1", EventType::Deposit),
            ],
        });

        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate trigger id 't1'"));
    }

    #[test]
    fn test_subscription_requires_address() {
        let mut config = Config::default();
        config.subscriptions.push(Subscription::new("s1", ""));
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_yaml("ingestion:\n  dedup_window: 42\nqueue:\n  max_attempts: 7\n");

        let config = temp_env::with_vars_unset(
            ["TRIPWIRE_INGESTION__DEDUP_WINDOW", "TRIPWIRE_QUEUE__MAX_ATTEMPTS"],
            || ConfigLoader::load_from_file(file.path()),
        )
        .unwrap();

        assert_eq!(config.ingestion.dedup_window, 42);
        assert_eq!(config.queue.max_attempts, 7);
        assert_eq!(config.ingestion.buffer_capacity, 1_000, "defaults fill gaps");
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let err = ConfigLoader::load_from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let file = write_yaml("logging:\n  level: loud\n");
        let result = temp_env::with_var_unset("TRIPWIRE_LOGGING__LEVEL", || {
            ConfigLoader::load_from_file(file.path())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override() {
        let file = write_yaml("queue:\n  max_attempts: 2\nlogging:\n  level: info\n");

        let config = temp_env::with_vars(
            [
                ("TRIPWIRE_QUEUE__MAX_ATTEMPTS", Some("9")),
                ("TRIPWIRE_LOGGING__LEVEL", Some("debug")),
            ],
            || ConfigLoader::load_from_file(file.path()),
        )
        .unwrap();

        assert_eq!(config.queue.max_attempts, 9, "Env should win over file");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_hierarchical_merging() {
        let base_file = write_yaml("ingestion:\n  dedup_window: 10\nlogging:\n  level: info\n  format: json\n");
        let override_file = write_yaml("ingestion:\n  dedup_window: 20\nlogging:\n  level: debug\n");

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.ingestion.dedup_window, 20, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
