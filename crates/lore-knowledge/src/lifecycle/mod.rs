//! Write-side pipelines: dedup, validation, merge, update, delete, skill
//! synthesis and the background jobs.
//!
//! Every path that replaces a piece goes through [`add_then_retire`], so a
//! reader never sees zero active versions of a logical piece.

pub mod dedup;
pub mod deleter;
pub mod merge;
pub mod merge_job;
pub mod revalidation;
pub mod skills;
pub mod updater;
pub mod validator;

pub use dedup::{DedupJudgePrompt, DedupSettings, Deduplicator, SimilarityBand};
pub use deleter::Deleter;
pub use merge::{MergePrompt, MergeSettings, MergeStrategyManager};
pub use merge_job::MergeJob;
pub use revalidation::{RevalidationJob, RevalidationReport};
pub use skills::{SKILLS_INFO_TYPE, SkillPrompt, SkillSettings, SkillSynthesizer};
pub use updater::{UpdateIntent, UpdateIntentPrompt, UpdateSettings, Updater, compose_content};
pub use validator::{ContentValidator, ValidationPrompt, ValidationSettings};

use lore_memory::{KnowledgePieceStore, MemoryError, PieceFilter, PieceQuery};
use lore_types::{KnowledgePiece, cosine_similarity};
use tracing::{debug, error, warn};

use crate::error::{KnowledgeError, Result};

/// Store `new`, then deactivate `old_id`.
///
/// If the old piece cannot be retired, `new` is removed again (best effort)
/// and the retire error is returned.
pub fn add_then_retire(
    store: &dyn KnowledgePieceStore,
    new: &KnowledgePiece,
    old_id: &str,
) -> Result<()> {
    store.add(new)?;

    match retire(store, old_id) {
        Ok(()) => {
            debug!(new_id = %new.piece_id, old_id, "Superseded piece");
            Ok(())
        }
        Err(e) => {
            warn!(new_id = %new.piece_id, old_id, error = %e, "Retire failed, rolling back new version");
            if let Err(rollback) = store.remove(&new.piece_id) {
                error!(new_id = %new.piece_id, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Undo a completed [`add_then_retire`]: remove `new` and reactivate
/// `old_id`. Best effort; failures are logged.
pub fn undo_supersede(store: &dyn KnowledgePieceStore, new_id: &str, old_id: &str) {
    if let Err(e) = store.remove(new_id) {
        error!(new_id, error = %e, "Rollback failed to remove new version");
    }
    let restored = store.get(old_id).and_then(|old| match old {
        Some(mut old) => {
            old.is_active = true;
            old.touch();
            store.update(&old)
        }
        None => Ok(false),
    });
    match restored {
        Ok(true) => debug!(new_id, old_id, "Rolled back supersede"),
        Ok(false) => error!(old_id, "Rollback found no piece to reactivate"),
        Err(e) => error!(old_id, error = %e, "Rollback failed to reactivate old version"),
    }
}

/// Mark a piece inactive.
pub fn retire(store: &dyn KnowledgePieceStore, piece_id: &str) -> Result<()> {
    let mut old = store
        .get(piece_id)?
        .ok_or_else(|| KnowledgeError::NotFound(piece_id.to_string()))?;
    old.is_active = false;
    old.touch();
    if !store.update(&old)? {
        return Err(KnowledgeError::NotFound(piece_id.to_string()));
    }
    Ok(())
}

/// Up to `limit` active pieces nearest to `embedding`, by exact cosine
/// similarity, most similar first. Pieces without an embedding and
/// `exclude_id` are skipped.
pub fn nearest_neighbors(
    store: &dyn KnowledgePieceStore,
    embedding: &[f32],
    filter: PieceFilter,
    limit: usize,
    exclude_id: Option<&str>,
) -> Result<Vec<(KnowledgePiece, f32)>> {
    // one extra so excluding the piece itself still leaves `limit`
    let query = PieceQuery::new("", limit + 1)
        .with_embedding(embedding.to_vec())
        .with_filter(filter);

    let hits = match store.vector_search(&query) {
        Ok(hits) => hits,
        Err(MemoryError::Unsupported(_)) => store.search(&query)?,
        Err(e) => return Err(e.into()),
    };

    let mut neighbors: Vec<(KnowledgePiece, f32)> = hits
        .into_iter()
        .filter(|r| exclude_id != Some(r.piece.piece_id.as_str()))
        .filter_map(|r| {
            let sim = cosine_similarity(embedding, r.piece.embedding.as_deref()?);
            Some((r.piece, sim))
        })
        .collect();
    neighbors.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.piece_id.cmp(&b.0.piece_id))
    });
    neighbors.truncate(limit);
    Ok(neighbors)
}
