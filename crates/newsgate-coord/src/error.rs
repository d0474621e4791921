use newsgate_core::Provider;
use thiserror::Error;

/// Failures of the shared coordination store.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The backend could not be reached or rejected the operation.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// A stored value did not have the expected shape.
    #[error("corrupt coordination value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyPoolError {
    /// Every configured key for the provider is cooling down (or none are
    /// configured). Callers skip the provider for this cycle.
    #[error("no API keys available for {provider}")]
    NoKeysAvailable { provider: Provider },
}

/// Outcome of [`crate::KeyPool::call_with_keys`] when no key produced a result.
#[derive(Debug, Error)]
pub enum KeyedCallError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Keys(#[from] KeyPoolError),

    /// The operation failed in a way another key would not fix.
    #[error(transparent)]
    Call(E),
}
