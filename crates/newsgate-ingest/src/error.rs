use newsgate_providers::ProviderError;
use thiserror::Error;

/// Failures handing work to the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("job queue backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("invalid payload for job '{job}': {source}")]
    Payload {
        job: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rotation table is empty")]
    EmptyRotation,

    #[error("invalid junk keyword pattern: {0}")]
    JunkPattern(#[from] regex::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
