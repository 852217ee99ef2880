//! Error types for the knowledge crate.

use lore_types::ScoredPiece;
use thiserror::Error;

/// Result type alias using the knowledge error type.
pub type Result<T> = std::result::Result<T, KnowledgeError>;

/// Error type for retrieval, lifecycle and ingestion operations.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Caller input failed validation (empty content, bad id, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Content matched a sensitive-data pattern and was not stored.
    #[error("Sensitive content rejected (matched {pattern})")]
    SensitiveContent { pattern: String },

    /// A destructive operation needs explicit ids before it proceeds.
    ///
    /// Not a failure: the candidates are what the caller should confirm.
    #[error("Confirmation required: {} candidate(s) matched, pass explicit ids to proceed", candidates.len())]
    ConfirmationRequired { candidates: Vec<ScoredPiece> },

    /// A referenced piece does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structured LLM output could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An ingestion payload is missing required fields or carries bad values.
    #[error("Schema error: {}", .0.join("; "))]
    Schema(Vec<String>),

    /// Storage backend error.
    #[error("Store error: {0}")]
    Store(#[from] lore_memory::MemoryError),

    /// Completion or embedding error.
    #[error("LLM error: {0}")]
    Llm(#[from] lore_llm::LlmError),

    /// Type-level validation error.
    #[error("Type error: {0}")]
    Types(#[from] lore_types::TypesError),

    /// Configuration error (bad regex, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error (debug sessions).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background task was cancelled.
    #[error("Task cancelled")]
    Cancelled,

    /// Internal error (join failures, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KnowledgeError {
    /// Create an invalid input error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a confirmation request rather than a failure.
    pub fn is_confirmation_required(&self) -> bool {
        matches!(self, Self::ConfirmationRequired { .. })
    }
}

impl From<regex::Error> for KnowledgeError {
    fn from(err: regex::Error) -> Self {
        KnowledgeError::Config(format!("invalid pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KnowledgeError::invalid("content is empty");
        assert_eq!(err.to_string(), "Invalid input: content is empty");

        let err = KnowledgeError::Schema(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Schema error: a; b");

        let err = KnowledgeError::ConfirmationRequired { candidates: vec![] };
        assert!(err.to_string().contains("0 candidate(s)"));
        assert!(err.is_confirmation_required());
    }

    #[test]
    fn test_from_memory_error() {
        let err: KnowledgeError = lore_memory::MemoryError::NotFound("p1".into()).into();
        assert!(matches!(err, KnowledgeError::Store(_)));
    }
}
