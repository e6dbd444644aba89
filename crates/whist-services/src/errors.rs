//! Service error types.

/// Errors from the remote services and the persisted store.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Transport failure: connect, timeout, TLS, or body read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure reported without an underlying HTTP error.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token endpoint rejected a grant.
    #[error("OAuth error ({status}): {message}")]
    OAuth {
        /// HTTP status code (0 if no response).
        status: u16,
        message: String,
    },

    /// A latency probe did not answer within its timeout.
    #[error("probe timed out after {0} ms")]
    ProbeTimeout(u64),

    /// A latency probe answered with a non-success status.
    #[error("probe returned HTTP {0}")]
    ProbeStatus(u16),

    #[error("store error: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl ServiceError {
    /// Whether the failure happened before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Transport(_) | Self::ProbeTimeout(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
