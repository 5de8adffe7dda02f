//! Error types for resync

use thiserror::Error;

/// Result type alias for resync operations
pub type Result<T> = std::result::Result<T, ResyncError>;

/// Main error type for resync
#[derive(Error, Debug)]
pub enum ResyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Duplicate run id: {0}")]
    DuplicateRun(String),

    #[error("Scope already has a running job: {0}")]
    ScopeBusy(String),

    #[error("Sync runner failed: {0:#}")]
    Runner(#[from] anyhow::Error),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResyncError {
    /// Check if error is retryable
    ///
    /// Only lock contention on the database counts; everything else needs a
    /// caller decision.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResyncError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            ResyncError::ScopeBusy(_) => true,
            _ => false,
        }
    }

    /// Message stored on a failed job
    pub fn recorded_message(&self) -> String {
        match self {
            ResyncError::Runner(e) => format!("{:#}", e),
            other => other.to_string(),
        }
    }
}
