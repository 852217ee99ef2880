//! Write-time checks applied by store adapters.
//!
//! - Piece identity and content
//! - Embedding dimensions and values

use lore_types::KnowledgePiece;

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific reasons a record is refused by a store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("piece id is empty")]
    EmptyId,

    #[error("piece content is empty")]
    EmptyContent,

    /// Null bytes usually mean binary data was passed as text.
    #[error("piece content contains null bytes")]
    NullByte,

    #[error("piece info_type is empty")]
    EmptyInfoType,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },
}

impl From<ValidationError> for MemoryError {
    fn from(err: ValidationError) -> Self {
        MemoryError::InvalidData(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate an embedding vector.
///
/// Checks the dimension (when an expected size is known) and that no
/// value is NaN or infinite.
pub fn validate_embedding(
    embedding: &[f32],
    expected_dim: Option<usize>,
) -> std::result::Result<(), ValidationError> {
    if let Some(expected) = expected_dim
        && embedding.len() != expected
    {
        return Err(ValidationError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding
        .iter()
        .filter(|v| v.is_nan() || v.is_infinite())
        .count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Piece Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a piece before it is written.
pub fn validate_piece(
    piece: &KnowledgePiece,
    expected_dim: Option<usize>,
) -> std::result::Result<(), ValidationError> {
    if piece.piece_id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if piece.content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if piece.content.contains('\0') {
        return Err(ValidationError::NullByte);
    }
    if piece.info_type.trim().is_empty() {
        return Err(ValidationError::EmptyInfoType);
    }
    if let Some(embedding) = &piece.embedding {
        validate_embedding(embedding, expected_dim)?;
    }
    Ok(())
}

/// [`validate_piece`] mapped into the store error type.
pub fn validate_piece_result(piece: &KnowledgePiece, expected_dim: Option<usize>) -> Result<()> {
    validate_piece(piece, expected_dim).map_err(MemoryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_types::KnowledgeType;

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2], Some(2)).is_ok());
        assert!(validate_embedding(&[0.1, 0.2, 0.3], None).is_ok());
        assert_eq!(
            validate_embedding(&[0.1], Some(2)),
            Err(ValidationError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            validate_embedding(&[f32::NAN, f32::INFINITY, 0.0], None),
            Err(ValidationError::InvalidEmbeddingValues { count: 2 })
        );
    }

    #[test]
    fn test_validate_piece() {
        let ok = KnowledgePiece::new("content", KnowledgeType::Note);
        assert!(validate_piece(&ok, None).is_ok());

        let mut blank = ok.clone();
        blank.content = "   ".into();
        assert_eq!(validate_piece(&blank, None), Err(ValidationError::EmptyContent));

        let mut no_id = ok.clone();
        no_id.piece_id.clear();
        assert_eq!(validate_piece(&no_id, None), Err(ValidationError::EmptyId));

        let mut binary = ok.clone();
        binary.content = "a\0b".into();
        assert_eq!(validate_piece(&binary, None), Err(ValidationError::NullByte));

        let bad_vec = ok.with_embedding(vec![1.0, 2.0]);
        assert!(validate_piece(&bad_vec, Some(3)).is_err());
    }

    #[test]
    fn test_into_memory_error() {
        let piece = KnowledgePiece::new(" ", KnowledgeType::Note);
        let err = validate_piece_result(&piece, None).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidData(msg) if msg.contains("empty")));
    }
}
