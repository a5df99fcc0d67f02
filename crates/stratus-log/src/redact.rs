//! Masking of secrets in JSON payloads before they reach the logs
//!
//! Redaction only ever touches the copy of a payload that is about to be
//! logged. Every leaf whose dotted path (case-insensitively) contains one of
//! the registered sensitive substrings and whose value is a non-empty string
//! is replaced with [`MASK`]. Array elements are addressed by index, so
//! `users.0.password` is a valid path and arrays stay arrays in the output.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Literal written in place of a sensitive value.
pub const MASK: &str = "***";

/// Substrings registered by [`RedactionRules::default`].
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &["password", "secret", "token"];

/// Errors produced while redacting a payload
#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    #[error("payload is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode redacted payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Shared, mutable set of sensitive path substrings.
///
/// Cloning yields another handle to the same set, so a rule added through one
/// handle is seen by every component that logs through another. Substrings are
/// stored lowercased.
#[derive(Clone, Debug)]
pub struct RedactionRules {
    keys: Arc<RwLock<BTreeSet<String>>>,
}

impl RedactionRules {
    /// Create a rule set with no sensitive substrings.
    pub fn empty() -> Self {
        Self {
            keys: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    /// Create a rule set seeded with the given substrings.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = Self::empty();
        for key in keys {
            rules.add(key.as_ref());
        }
        rules
    }

    /// Register a sensitive substring. Returns `false` if it was already
    /// present or is empty (an empty substring would match every path).
    pub fn add(&self, key: &str) -> bool {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return false;
        }
        self.keys.write().insert(key)
    }

    /// Unregister a sensitive substring.
    pub fn remove(&self, key: &str) -> bool {
        self.keys.write().remove(&key.trim().to_lowercase())
    }

    /// Current substrings in sorted order.
    pub fn snapshot(&self) -> Vec<String> {
        self.keys.read().iter().cloned().collect()
    }

    /// Whether a dotted path contains any registered substring.
    pub fn is_sensitive(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.keys.read().iter().any(|key| path.contains(key.as_str()))
    }

    /// Redact a JSON payload with this rule set.
    pub fn redact(&self, payload: &[u8]) -> Result<Vec<u8>, RedactError> {
        redact(payload, self)
    }

    /// Render a payload for logging.
    ///
    /// Falls back to the unredacted text when the payload cannot be redacted
    /// (e.g. it is not JSON); the payload on the wire is never affected.
    pub fn redact_for_log(&self, payload: &[u8]) -> String {
        match self.redact(payload) {
            Ok(redacted) => String::from_utf8_lossy(&redacted).into_owned(),
            Err(e) => {
                tracing::debug!(error = %e, "Payload redaction failed, logging it unredacted");
                String::from_utf8_lossy(payload).into_owned()
            }
        }
    }
}

impl Default for RedactionRules {
    fn default() -> Self {
        Self::with_keys(DEFAULT_SENSITIVE_KEYS)
    }
}

/// Mask every sensitive string leaf of a JSON payload.
pub fn redact(payload: &[u8], rules: &RedactionRules) -> Result<Vec<u8>, RedactError> {
    let mut tree: Value = serde_json::from_slice(payload).map_err(RedactError::Decode)?;

    // One snapshot per payload keeps the lock out of the tree walk.
    let keys = rules.snapshot();
    let mut path = String::new();
    mask_leaves(&mut tree, &mut path, &keys);

    serde_json::to_vec(&tree).map_err(RedactError::Encode)
}

fn mask_leaves(value: &mut Value, path: &mut String, keys: &[String]) {
    match value {
        Value::Object(map) => {
            for (name, child) in map.iter_mut() {
                let len = path.len();
                push_segment(path, name);
                mask_leaves(child, path, keys);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                let len = path.len();
                push_segment(path, &index.to_string());
                mask_leaves(child, path, keys);
                path.truncate(len);
            }
        }
        Value::String(text) if !text.is_empty() => {
            let lowered = path.to_lowercase();
            if keys.iter().any(|key| lowered.contains(key.as_str())) {
                *text = MASK.to_string();
            }
        }
        _ => {}
    }
}

fn push_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
}
