//! Error types for the retrieval crate.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building or querying the retrieval index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The query text was empty or contained only whitespace.
    #[error("invalid query: query text must not be empty")]
    InvalidQuery,

    /// The requested search mode is not known.
    #[error("invalid mode `{0}`: expected `lexical`, `exact` or `semantic`")]
    InvalidMode(String),

    /// The requested result limit was zero or negative.
    #[error("invalid limit {0}: limit must be positive")]
    InvalidLimit(i64),

    /// Dimension mismatch between a vector and the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension provided.
        actual: usize,
    },

    /// A vector had no direction (zero or non-finite norm) and could not be normalized.
    #[error("vector is not normalizable (norm = {norm})")]
    NotNormalized {
        /// Norm of the rejected vector.
        norm: f32,
    },

    /// Semantic search was attempted with no vectors loaded.
    #[error("vector index is empty")]
    IndexEmpty,

    /// A persisted index bundle is incomplete or inconsistent.
    #[error("corrupt index bundle: {0}")]
    CorruptIndex(String),

    /// The source feed produced no usable records.
    #[error("no input records to index")]
    NoInput,

    /// The embedding pipeline failed or timed out.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[source] anyhow::Error),

    /// Another build run holds the pipeline.
    #[error("an index build is already in progress")]
    BuildInProgress,

    /// A build run failed as a whole.
    #[error("build failed: {reason}")]
    Failed {
        /// Human-readable failure cause.
        reason: String,
    },

    /// A source record was rejected before indexing.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A storage or embedding call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: &'static str,
        /// Configured timeout.
        after: Duration,
    },

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),
}

impl IndexError {
    /// Returns `true` for caller input errors, which are surfaced immediately and never retried.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuery
                | Self::InvalidMode(_)
                | Self::InvalidLimit(_)
                | Self::DimensionMismatch { .. }
        )
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

macro_rules! database_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for IndexError {
                fn from(err: $ty) -> Self {
                    Self::Database(err.to_string())
                }
            }
        )*
    };
}

database_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, IndexError>;
