//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur in the store layer.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid query or parameters.
    #[error("Query error: {0}")]
    Query(String),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same id already exists.
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    /// Invalid data or state.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The backend does not implement this capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Failure reported by an external document service.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<lore_types::TypesError> for MemoryError {
    fn from(err: lore_types::TypesError) -> Self {
        MemoryError::InvalidData(err.to_string())
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
