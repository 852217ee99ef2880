//! Error types for the shared knowledge types.

use thiserror::Error;

/// Errors raised while constructing or parsing knowledge types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// A string did not match any variant of a closed enumeration.
    #[error("unknown {kind} value: '{value}'")]
    UnknownVariant {
        /// Name of the enumeration.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Piece content is empty or whitespace.
    #[error("content is empty")]
    EmptyContent,

    /// A required field is missing or empty.
    #[error("missing required field '{0}'")]
    MissingField(String),
}

/// Result type alias for type-level operations.
pub type Result<T> = std::result::Result<T, TypesError>;
