//! Soft and hard deletion, with a confirmation step for semantic deletes
//! and a guard against restoring superseded versions.

use lore_memory::{PieceFilter, PieceQuery, SharedPieceStore};
use lore_types::{DeleteMode, Id, OperationResult, ScoredPiece};
use tracing::{info, warn};

use crate::error::{KnowledgeError, Result};

pub struct Deleter {
    store: SharedPieceStore,
}

impl Deleter {
    pub fn new(store: SharedPieceStore) -> Self {
        Self { store }
    }

    /// Soft delete flips `is_active`; hard delete removes the row.
    pub fn delete_by_id(&self, piece_id: &str, mode: DeleteMode) -> Result<OperationResult> {
        let op = format!("delete ({})", mode);
        let Some(mut piece) = self.store.get(piece_id)? else {
            return Ok(OperationResult::failed(op, Some(piece_id.to_string()), "piece not found"));
        };

        match mode {
            DeleteMode::Soft => {
                if !piece.is_active {
                    return Ok(OperationResult::ok(op, piece_id).with_message("already inactive"));
                }
                piece.is_active = false;
                piece.touch();
                if !self.store.update(&piece)? {
                    return Ok(OperationResult::failed(op, Some(piece_id.to_string()), "piece not found"));
                }
            }
            DeleteMode::Hard => {
                if !self.store.remove(piece_id)? {
                    return Ok(OperationResult::failed(op, Some(piece_id.to_string()), "piece not found"));
                }
            }
        }
        info!(piece_id, mode = %mode, "Deleted piece");
        Ok(OperationResult::ok(op, piece_id))
    }

    /// Delete pieces matching `query`.
    ///
    /// Without `confirmed_ids` nothing is deleted: matching candidates come
    /// back in [`KnowledgeError::ConfirmationRequired`]. With ids, exactly
    /// those pieces are deleted and the query is not consulted.
    pub fn delete_by_query(
        &self,
        query: &str,
        confirmed_ids: Option<&[Id]>,
        mode: DeleteMode,
        top_k: usize,
    ) -> Result<Vec<OperationResult>> {
        if let Some(ids) = confirmed_ids {
            return ids.iter().map(|id| self.delete_by_id(id, mode)).collect();
        }
        if query.trim().is_empty() {
            return Err(KnowledgeError::invalid("delete query is empty"));
        }

        let candidates: Vec<ScoredPiece> = self
            .store
            .search(&PieceQuery::new(query, top_k.max(1)).with_filter(PieceFilter::new()))?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        warn!(query, candidates = candidates.len(), "Semantic delete needs confirmation");
        Err(KnowledgeError::ConfirmationRequired { candidates })
    }

    /// Reactivate a soft-deleted piece.
    ///
    /// Refused while any active piece supersedes it.
    pub fn restore_by_id(&self, piece_id: &str) -> Result<OperationResult> {
        const OP: &str = "restore";
        let Some(mut piece) = self.store.get(piece_id)? else {
            return Ok(OperationResult::failed(OP, Some(piece_id.to_string()), "piece not found"));
        };
        if piece.is_active {
            return Ok(OperationResult::ok(OP, piece_id).with_message("already active"));
        }

        let superseder = self
            .store
            .list_all(&PieceFilter::new())?
            .into_iter()
            .find(|p| p.supersedes.as_deref() == Some(piece_id));
        if let Some(active) = superseder {
            return Ok(OperationResult::failed(
                OP,
                Some(piece_id.to_string()),
                format!("superseded by active piece {}; deactivate it first", active.piece_id),
            ));
        }

        piece.is_active = true;
        piece.touch();
        if !self.store.update(&piece)? {
            return Ok(OperationResult::failed(OP, Some(piece_id.to_string()), "piece not found"));
        }
        info!(piece_id, "Restored piece");
        Ok(OperationResult::ok(OP, piece_id))
    }
}
