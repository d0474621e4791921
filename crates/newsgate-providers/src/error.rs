use newsgate_coord::{FailureKind, KeyedFailure};
use newsgate_core::Provider;
use thiserror::Error;

/// A provider response whose shape did not match the expected schema.
#[derive(Debug, Error)]
#[error("{provider} response did not match schema: {reason}")]
pub struct SchemaError {
    pub provider: Provider,
    pub reason: String,
}

/// Failure of a single HTTP exchange with a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, TLS or timeout failure. The request URL is stripped because
    /// it carries the API key.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{0} does not serve news")]
    NotNewsProvider(Provider),
}

impl ProviderError {
    /// `true` for failures worth retrying with the same key after a back-off.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status, .. } => *status >= 500 || *status == 408,
            ProviderError::Schema(_)
            | ProviderError::InvalidBaseUrl { .. }
            | ProviderError::NotNewsProvider(_) => false,
        }
    }
}

impl KeyedFailure for ProviderError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Status { status: 429, .. } => FailureKind::RateLimited,
            ProviderError::Status {
                status: 401 | 403, ..
            } => FailureKind::Unauthorized,
            e if e.is_retriable() => FailureKind::Transient,
            _ => FailureKind::Fatal,
        }
    }
}

/// Outcome of a provider fetch that produced no articles, as seen by the
/// orchestrator.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every key is cooling down. Not a provider health signal.
    #[error("no API keys available for {provider}")]
    NoKeysAvailable { provider: Provider },

    /// The provider's circuit breaker is open.
    #[error("{provider} is unavailable (circuit open)")]
    ProviderUnavailable { provider: Provider },

    /// Server or network failures that survived every retry.
    #[error("{provider} failed transiently: {source}")]
    Transient {
        provider: Provider,
        #[source]
        source: ProviderError,
    },

    /// The provider answered 200 with a body that does not match its schema.
    /// Yields no articles; counts against the provider, not the key.
    #[error("{provider} returned a malformed response: {source}")]
    Schema {
        provider: Provider,
        #[source]
        source: SchemaError,
    },

    /// The provider refused the request in a way retries will not fix.
    #[error("{provider} rejected the request: {source}")]
    Rejected {
        provider: Provider,
        #[source]
        source: ProviderError,
    },
}

impl FetchError {
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            FetchError::NoKeysAvailable { provider }
            | FetchError::ProviderUnavailable { provider }
            | FetchError::Transient { provider, .. }
            | FetchError::Schema { provider, .. }
            | FetchError::Rejected { provider, .. } => *provider,
        }
    }

    /// Whether the circuit breaker should count this failure.
    #[must_use]
    pub fn counts_against_provider(&self) -> bool {
        matches!(self, FetchError::Transient { .. } | FetchError::Schema { .. })
    }
}
