//! Process-wide logging setup.
//!
//! Console output plus rolling log files, one root file and one file per
//! component, where events are routed by their `tracing` target:
//!
//! | Log File            | Component                        | Target Prefixes                                     |
//! |---------------------|----------------------------------|-----------------------------------------------------|
//! | stratus.log         | Root logger (all components)     | (all)                                               |
//! | control-plane.log   | Cluster control-plane client     | stratus_cluster                                     |
//! | transport.log       | Event-socket sessions            | stratus_cluster::session, stratus_cluster::transport |
//!
//! Log files are stored in `~/stratus/logs` by default.
//! Override with the `STRATUS_LOG_DIR` environment variable.
//!
//! The [`LoggingGuard`] returned by [`init_logging`] also owns the process-wide
//! [`RedactionRules`], so every component that logs payloads masks them with
//! the same rule set.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::redact::RedactionRules;

/// Root log file name.
const ROOT_LOG_FILE: &str = "stratus.log";

/// Internal definition for a component log file.
struct ComponentLogDef {
    /// Log file name (e.g. "control-plane.log")
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "control-plane.log",
        targets: &["stratus_cluster"],
    },
    ComponentLogDef {
        file_name: "transport.log",
        targets: &["stratus_cluster::session", "stratus_cluster::transport"],
    },
];

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize logging: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate daily (default)
    Daily,
    /// Rotate hourly
    Hourly,
    /// Never rotate (single file)
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration for a Stratus process.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/stratus/logs`)
    pub log_dir: PathBuf,
    /// Enable console output
    pub console_output: bool,
    /// Console log level
    pub console_level: Level,
    /// Enable file logging
    pub file_logging: bool,
    /// Default log level for files
    pub file_level: Level,
    /// Log rotation policy
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: false,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/stratus/logs", home))
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let log_dir = std::env::var("STRATUS_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_log_dir());

        let console_output = std::env::var("STRATUS_LOG_CONSOLE")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let file_logging = std::env::var("STRATUS_LOG_FILE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let console_level = std::env::var("STRATUS_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        let file_level = std::env::var("STRATUS_LOG_FILE_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(console_level);

        Self {
            log_dir,
            console_output,
            console_level,
            file_logging,
            file_level,
            rotation: LogRotation::Daily,
        }
    }

    /// Create from application configuration values.
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: &str,
    ) -> Self {
        let log_dir = log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir);
        let level = level.parse().unwrap_or(Level::INFO);

        Self {
            log_dir,
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

/// Guard that keeps the logging system alive.
///
/// Holds the file appender worker guards and the process-wide redaction
/// rules. Dropping it flushes buffered file output.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
    redaction: RedactionRules,
}

impl LoggingGuard {
    /// Handle to the process-wide redaction rules.
    pub fn redaction_rules(&self) -> RedactionRules {
        self.redaction.clone()
    }
}

/// Initialize the global subscriber with the default redaction rules.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LogError> {
    init_logging_with_rules(config, RedactionRules::default())
}

/// Initialize the global subscriber, installing `rules` as the process-wide
/// redaction rule set.
///
/// `RUST_LOG` overrides the configured console and root-file levels; component
/// files capture everything from their targets.
pub fn init_logging_with_rules(
    config: &LoggingConfig,
    rules: RedactionRules,
) -> Result<LoggingGuard, LogError> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir).map_err(|source| LogError::CreateDir {
            path: config.log_dir.clone(),
            source,
        })?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default().with(layers).try_init()?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }
    tracing::debug!(rules = ?rules.snapshot(), "Redaction rules installed");

    Ok(LoggingGuard {
        _file_guards: guards,
        redaction: rules,
    })
}
