//! Error types shared across the search service.

use thiserror::Error;

/// Top-level error type for search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Caller/configuration errors: alpha out of range, dimensionality
    /// mismatches, malformed model config. Fatal for the request, never
    /// silently clamped.
    #[error("configuration error: {0}")]
    Config(String),

    /// The query image bytes could not be decoded into an RGB image.
    #[error("invalid input image: {0}")]
    InvalidImage(String),

    /// The query filename resolved neither to a local file nor to an image
    /// on the remote photo server.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Predictor artifacts missing or malformed; fatal at startup.
    #[error("model not loadable: {0}")]
    ModelArtifacts(String),

    /// A model forward pass failed.
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    /// Persisted snapshot is missing columns or positionally misaligned.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
