//! Error types for waymark-store.

use std::path::PathBuf;

/// Result type for waymark-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in waymark-store.
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

    /// Sample not found in database.
    #[error("Sample not found: {0}")]
    SampleNotFound(String),

    /// Stored value could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Corrupt(#[from] waymark_types::ParseError),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
