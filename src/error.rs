// Domain errors. App plumbing (repos, startup) uses anyhow like the rest of the crate.

use thiserror::Error;

/// Rejected input to `Aggregator::ingest`; nothing was mutated or emitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("invalid sample: {0}")]
    InvalidSample(String),
}

/// Hand-off to the persistence collaborator failed. Never fatal for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("record writer is falling behind (channel full)")]
    ChannelFull,
    #[error("record writer has stopped (channel closed)")]
    ChannelClosed,
}

/// Payload rejected at the transport boundary, before reaching `ingest`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundaryError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("topic mismatch: {0}")]
    TopicMismatch(String),
    #[error(transparent)]
    Invalid(#[from] IngestError),
}
