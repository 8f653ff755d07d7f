use std::time::Duration;
use thiserror::Error;

/// OCR or vision call failed. Absorbed by the record builder as an empty field.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr process failed: {0}")]
    OcrFailed(String),

    #[error("vision request failed: {0}")]
    VisionFailed(String),

    #[error("invalid response from {service}: {details}")]
    BadResponse { service: String, details: String },

    #[error("{stage} timed out after {timeout:?}")]
    Timeout { stage: &'static str, timeout: Duration },
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding dimension {got} != {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid model name: {0}")]
    InvalidModel(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_) | EmbeddingError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to {backend}: {details}")]
    Connect { backend: String, details: String },

    #[error("write to {backend} failed: {details}")]
    Write { backend: String, details: String },

    #[error("read from {backend} failed: {details}")]
    Read { backend: String, details: String },

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("{backend} holds {found}-dimensional embeddings, embedder produces {expected}")]
    DimensionMismatch {
        backend: String,
        expected: usize,
        found: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no images found in {0}")]
    NoImages(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid confidence thresholds: {0}")]
    InvalidThresholds(String),
}
