use std::path::PathBuf;

use cairn_types::ObjectId;

/// Errors from object store and content index operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Content hash mismatch on read (data corruption).
    #[error("hash mismatch for {id}: computed {computed}")]
    HashMismatch { id: ObjectId, computed: ObjectId },

    /// The object data is malformed or cannot be decoded.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// A chunk envelope could not be decoded.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    /// A line of an index file could not be parsed.
    #[error("invalid index line {line} in {path}: {reason}")]
    InvalidIndexLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The named content index does not exist in the database.
    #[error("content index not found: {0}")]
    IndexNotFound(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
