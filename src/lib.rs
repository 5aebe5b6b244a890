use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Text extraction failed for '{document}': {reason}")]
    ExtractionFailed { document: String, reason: String },

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Knowledge base is not ready: {0}")]
    KnowledgeBaseNotReady(String),

    #[error("Knowledge base must be rebuilt: {0}")]
    RebuildRequired(String),

    #[error("A knowledge base rebuild is already in progress")]
    RebuildInProgress,

    #[error("Rebuild produced no content: {0}")]
    NoContent(String),

    #[error("Persisted knowledge base is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Text generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod assistant;
pub mod commands;
pub mod config;
pub mod crawler;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod retrieval;

#[cfg(test)]
pub(crate) mod test_support;
