//! Client error types for the cluster control-plane client

use std::time::Duration;

/// Error type for control-plane client operations
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("context canceled")]
    Cancelled,

    #[error("control plane reported {event}: {message}")]
    Remote { event: String, message: String },

    #[error("connection closed")]
    Closed,

    #[error("no hosts configured")]
    NoHosts,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid control-plane url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("json codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("config source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("receiver failed: {0}")]
    Receiver(#[source] anyhow::Error),

    #[error("unhealthy: {0}")]
    Unhealthy(&'static str),

    #[error("client is already running")]
    AlreadyRunning,
}

impl ClusterError {
    /// Whether this error only reports cancellation of the caller's context.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClusterError::Cancelled)
    }

    /// Whether retrying with a fresh session cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::InvalidConfig(_) | ClusterError::AlreadyRunning
        )
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
