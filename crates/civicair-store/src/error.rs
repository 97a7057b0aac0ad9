//! Error types for civicair-store.

use std::path::PathBuf;

/// Result type for civicair-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in civicair-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp could not be represented.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}
