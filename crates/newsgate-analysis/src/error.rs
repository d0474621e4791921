use newsgate_coord::{FailureKind, KeyedFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Network or TLS failure. The request URL is stripped.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The model answered, but not with the JSON we asked for.
    #[error("malformed AI response: {0}")]
    Malformed(String),

    #[error("AI provider circuit is open")]
    CircuitOpen,

    #[error("no AI API keys available")]
    NoKeysAvailable,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl AnalysisError {
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            AnalysisError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AnalysisError::Status { status, .. } => *status >= 500 || *status == 408,
            AnalysisError::Malformed(_)
            | AnalysisError::CircuitOpen
            | AnalysisError::NoKeysAvailable
            | AnalysisError::InvalidBaseUrl { .. } => false,
        }
    }
}

impl KeyedFailure for AnalysisError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            AnalysisError::Status { status: 429, .. } => FailureKind::RateLimited,
            AnalysisError::Status {
                status: 401 | 403, ..
            } => FailureKind::Unauthorized,
            e if e.is_retriable() => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }
}
