//! Stratus Log - process-wide logging setup
//!
//! This crate provides:
//! - Console and rolling-file logging built on `tracing-subscriber`
//! - Per-component log files routed by tracing target
//! - The redaction rule registry used to mask secrets in logged payloads

pub mod logging;
pub mod redact;

pub use logging::{
    LogError, LogRotation, LoggingConfig, LoggingGuard, init_logging, init_logging_with_rules,
};
pub use redact::{DEFAULT_SENSITIVE_KEYS, MASK, RedactError, RedactionRules, redact};
