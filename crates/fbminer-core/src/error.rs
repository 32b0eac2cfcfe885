//! Error type shared by every fbminer crate.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, MinerError>;

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("Config error: {0}")]
    Config(String),

    /// Transport-level failure talking to the backend (connect, timeout, decode).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend answered with a non-success status.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Daily quota exceeded: {0}")]
    Quota(String),

    /// A dispatch job is already running.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MinerError {
    /// True for errors that came back from the backend as an HTTP status.
    pub fn is_http(&self) -> bool {
        matches!(self, MinerError::Http { .. })
    }

    /// HTTP status code, if this is an HTTP error.
    pub fn status(&self) -> Option<u16> {
        match self {
            MinerError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
