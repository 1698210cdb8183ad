use std::path::PathBuf;

use thiserror::Error;

// ─── Monitor errors ──────────────────────────────────────────────

/// Everything that can go wrong while setting up or operating the
/// monitor itself. None of these ever reach a request handler.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("log file {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector answered with status {0}")]
    Status(u16),

    #[error("cannot install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("no tokio runtime available to drive background tasks")]
    NoRuntime,
}

// ─── Dispatch errors ─────────────────────────────────────────────

/// A failure raised by an application handler while a request walks
/// the routing tree. Probes forward these untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("no route for {method} {path}")]
    NotFound { method: String, path: String },
}

impl DispatchError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}
