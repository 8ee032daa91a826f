//! Error types for the scan engine.
//!
//! "Target not found" is deliberately absent: it is a normal probe result,
//! not an error.

use std::path::PathBuf;

use thiserror::Error;

/// Detection backend failed while looking for a target.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("surface capture failed: {0}")]
    Capture(String),

    #[error("failed to load template {path}: {detail}")]
    Template { path: PathBuf, detail: String },

    #[error("backend request failed: {0}")]
    Backend(String),
}

/// Activation of a located target failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The target exists but cannot take input right now (overlay, not
    /// interactable). Eligible for one forced activation.
    #[error("target not interactable: {0}")]
    Blocked(String),

    #[error("activation failed: {0}")]
    Failed(String),
}

/// Fatal at startup; the run loop must not begin.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("{0}")]
    Conflict(String),

    #[error("required target '{0}' could not be resolved")]
    MissingTarget(&'static str),

    #[error("configuration file malformed: {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Remote notification transport failure. Never leaves the notifier.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote rejected request: {0}")]
    Rejected(String),
}

/// A fault that ends the current cycle and clears the run flag.
#[derive(Debug, Error)]
pub enum ScanFault {
    #[error("probe for {target} failed: {source}")]
    Probe {
        target: &'static str,
        #[source]
        source: ProbeError,
    },

    #[error("giving up after {failures} consecutive activation failures (last on {target}: {last})")]
    DispatchExhausted {
        target: &'static str,
        failures: u32,
        last: DispatchError,
    },
}
