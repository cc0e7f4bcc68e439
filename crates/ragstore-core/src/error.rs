//! Error types for ragstore.

use thiserror::Error;

/// Result type alias using ragstore's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ragstore operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding generation failed or produced unusable vectors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Uniqueness on `chunk_id` could not be established, even after
    /// deduplicating the table and retrying once.
    #[error("Unique index on {table}.chunk_id could not be enforced: {message}")]
    UniqueIndex { table: String, message: String },

    /// A multi-table write stopped part-way: `completed` tables were
    /// committed, `failed` was not. Nothing is rolled back.
    #[error(
        "Partial write in namespace '{namespace}': committed {completed:?}, failed on {failed}: {message}"
    )]
    PartialWrite {
        namespace: String,
        completed: Vec<String>,
        failed: String,
        message: String,
    },
}

impl Error {
    /// Whether the error is transient infrastructure trouble (pool exhaustion,
    /// timeouts, dropped connections) that a caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::WorkerCrashed
            ),
            Error::Request(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
