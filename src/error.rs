use thiserror::Error;

/// Errors surfaced by chunking, embedding, storage and the pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding model could not be downloaded or loaded
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model is loaded but failed to embed a text
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A query was issued against a collection that was never built
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// A vector does not have the length the collection was built with
    #[error("collection '{collection}' holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Nothing to work with: no chunks survived filtering, or a blank question
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// The persistent store could not be read or written
    #[error("store I/O failure: {0}")]
    StoreIo(String),

    /// The input document could not be read or is not text
    #[error("document error: {0}")]
    Document(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::StoreIo(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
