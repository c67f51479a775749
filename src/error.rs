//! Error taxonomy for the retrieval engine.
//!
//! Validation, capability, and storage failures are separate variants so
//! callers (and operators reading logs) can tell "the model is unreachable"
//! apart from "the data directory is damaged". Each variant carries a stable
//! machine-readable [`kind`](StoreError::kind) used by the HTTP layer.

use thiserror::Error;

/// Failures of the vector store and the ingest path that writes into it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document produced no chunks")]
    EmptyDocument,

    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding capability unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("storage I/O error: {0}")]
    StorageIo(String),

    #[error("incompatible index: {0}")]
    IncompatibleIndex(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("index holds {index} vectors but metadata holds {metadata} records")]
    Misaligned { index: usize, metadata: usize },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::EmptyDocument => "empty_document",
            StoreError::DimensionMismatch { .. } => "dimension_mismatch",
            StoreError::EmbeddingUnavailable(_) => "embedding_unavailable",
            StoreError::StorageIo(_) => "storage_io",
            StoreError::IncompatibleIndex(_) => "incompatible_index",
            StoreError::CorruptIndex(_) => "corrupt_index",
            StoreError::Misaligned { .. } => "misaligned",
        }
    }

    /// True for errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::EmptyDocument)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::StorageIo(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::StorageIo(e.to_string())
    }
}

/// Failures of byte- and file-level ingestion, before text reaches the store.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{doc_id}: content is not UTF-8 text")]
    Binary { doc_id: String },

    #[error("{path}: {message}")]
    Unreadable { path: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Binary { .. } => "binary_content",
            IngestError::Unreadable { .. } => "storage_io",
            IngestError::Store(e) => e.kind(),
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            IngestError::Binary { .. } => true,
            IngestError::Unreadable { .. } => false,
            IngestError::Store(e) => e.is_validation(),
        }
    }
}

/// Failures of the query path.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("embedding capability unavailable: {0}")]
    Embedding(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::EmptyQuery => "empty_query",
            QueryError::Embedding(_) => "embedding_unavailable",
            QueryError::Store(e) => e.kind(),
        }
    }
}

/// A single generation backend's failure. Never surfaced to query callers;
/// the router falls through to the next backend and keeps the message as a
/// diagnostic.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{backend}: unreachable: {message}")]
    Unreachable { backend: String, message: String },

    #[error("{backend}: timed out")]
    Timeout { backend: String },

    #[error("{backend}: HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("{backend}: invalid response: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("{backend}: empty response")]
    Empty { backend: String },
}

impl GenerationError {
    pub(crate) fn from_reqwest(backend: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout {
                backend: backend.to_string(),
            }
        } else {
            GenerationError::Unreachable {
                backend: backend.to_string(),
                message: err.to_string(),
            }
        }
    }
}
