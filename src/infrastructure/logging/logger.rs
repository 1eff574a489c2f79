use anyhow::Result;
use std::io;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::domain::models::LoggingConfig;

const LOG_FILE_NAME: &str = "tripwire.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => anyhow::bail!("Invalid log format: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl FromStr for RotationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "hourly" => Ok(Self::Hourly),
            "never" => Ok(Self::Never),
            other => anyhow::bail!("Invalid log rotation: {other}"),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logger implementation using tracing
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Initialize the global subscriber.
    ///
    /// Console output goes to stderr so that command output on stdout stays
    /// machine-readable. When `log_dir` is set, a rolling JSON file layer is
    /// added; the returned logger owns its worker guard and must be kept alive
    /// for the lifetime of the process.
    ///
    /// # Errors
    /// Returns an error for an unknown level, format or rotation, or when a
    /// global subscriber is already installed.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let format = LogFormat::from_str(&config.format)?;
        let rotation = RotationPolicy::from_str(&config.rotation)?;

        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let mut layers: Vec<BoxedLayer> = vec![console_layer(format)];

        let guard = if let Some(ref log_dir) = config.log_dir {
            let file_appender = match rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, LOG_FILE_NAME),
                RotationPolicy::Hourly => rolling::hourly(log_dir, LOG_FILE_NAME),
                RotationPolicy::Never => rolling::never(log_dir, LOG_FILE_NAME),
            };
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            // Files are always JSON.
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
            Some(guard)
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(layers.with_filter(env_filter))
            .try_init()?;

        tracing::info!(
            level = %config.level,
            format = ?format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }

    #[cfg(test)]
    pub fn guard(&self) -> &Option<WorkerGuard> {
        &self._guard
    }
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}
