//! Error types for BurrowDB.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using BurrowError.
pub type Result<T> = std::result::Result<T, BurrowError>;

/// Errors that can occur in BurrowDB operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filesystem operation '{operation}' failed for path '{}': {source}", path.display())]
    FileSystem {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("invalid config {field}={value}: {reason}")]
    ConfigInvalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    // Naming and key errors
    #[error("invalid bucket name '{name}': {reason}")]
    BucketNameInvalid { name: String, reason: &'static str },

    #[error("invalid key: {reason}")]
    KeyInvalid { reason: String },

    #[error("invalid value for index '{index}': {reason}")]
    IndexValueInvalid { index: String, reason: &'static str },

    // Read errors
    #[error("key '{key}' not found in bucket '{bucket}'")]
    KeyNotFound { bucket: String, key: String },

    #[error("bucket '{bucket}' not found")]
    BucketNotFound { bucket: String },

    // Codec errors
    #[error("codec failure during {context}: {source}")]
    Codec {
        context: &'static str,
        #[source]
        source: bincode::Error,
    },

    // Query errors
    #[error("invalid query {field}={value}: {reason}")]
    QueryInvalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    // WAL errors
    #[error("WAL corrupted at operation {index}: {reason}")]
    WalCorrupted { index: usize, reason: String },

    #[error("WAL replay failed at operation {operation_index} in {}: {source}", path.display())]
    WalReplay {
        path: PathBuf,
        operation_index: usize,
        #[source]
        source: Box<BurrowError>,
    },

    #[error("flush failed for {operation_count} operations: {source}")]
    Flush {
        operation_count: usize,
        #[source]
        source: Box<BurrowError>,
    },

    // Batch errors
    #[error("batch operation partially failed: {successful_count} successful, {} failed", failed.len())]
    PartialBatch {
        successful_count: usize,
        failed: HashMap<String, BurrowError>,
    },

    // Partition engine errors
    #[error("partition store corrupted at {}: {reason}", path.display())]
    TreeCorrupted { path: PathBuf, reason: String },

    // Cancellation
    #[error("operation cancelled")]
    Cancelled,
}

impl BurrowError {
    /// Wraps this error as the cause of a WAL replay failure.
    pub fn into_replay(self, path: PathBuf, operation_index: usize) -> Self {
        BurrowError::WalReplay {
            path,
            operation_index,
            source: Box::new(self),
        }
    }
}
