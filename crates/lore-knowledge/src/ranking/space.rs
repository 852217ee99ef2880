//! Space-aware search that adapts to backend capability.
//!
//! Backends that filter spaces natively get the filter as-is. Others are
//! over-fetched with the space constraint dropped and post-filtered, widening
//! the fetch until enough results survive or the backend runs dry.

use lore_memory::{KnowledgePieceStore, PieceQuery};
use lore_types::{ScoredPiece, Space};
use tracing::debug;

use crate::error::Result;

/// Fetch multipliers tried in order against backends without a space filter.
pub const OVERFETCH_STEPS: &[usize] = &[5, 20];

/// Keep only results in at least one of `spaces` (empty keeps everything).
pub fn filter_by_spaces(results: Vec<ScoredPiece>, spaces: &[Space]) -> Vec<ScoredPiece> {
    if spaces.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|r| r.piece.in_any_space(spaces))
        .collect()
}

/// Search honoring `query.filter.spaces` on any backend.
pub fn space_aware_search(
    store: &dyn KnowledgePieceStore,
    query: &PieceQuery,
) -> Result<Vec<ScoredPiece>> {
    let spaces = &query.filter.spaces;
    if spaces.is_empty() || store.supports_space_filter() {
        return Ok(store.search(query)?);
    }

    let unfiltered = query.filter.without_spaces();
    let mut kept = Vec::new();
    for step in OVERFETCH_STEPS {
        let fetch = query.top_k.saturating_mul(*step).max(1);
        let widened = query
            .clone()
            .with_filter(unfiltered.clone())
            .with_top_k(fetch);
        let raw = store.search(&widened)?;
        let exhausted = raw.len() < fetch;
        kept = filter_by_spaces(raw, spaces);
        debug!(
            fetch,
            kept = kept.len(),
            wanted = query.top_k,
            "Post-filtered over-fetched results by space"
        );
        if kept.len() >= query.top_k || exhausted {
            break;
        }
    }
    kept.truncate(query.top_k);
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lore_memory::{DocumentPieceStore, InMemoryDocumentService, InMemoryPieceStore, PieceFilter};
    use lore_types::{KnowledgePiece, KnowledgeType};

    fn seed(store: &dyn KnowledgePieceStore) {
        // many developmental pieces outrank the few main ones
        for i in 0..30 {
            store
                .add(
                    &KnowledgePiece::new(format!("deploy deploy note {i}"), KnowledgeType::Note)
                        .with_id(format!("dev-{i:02}"))
                        .with_space(Space::Developmental),
                )
                .unwrap();
        }
        for i in 0..3 {
            store
                .add(
                    &KnowledgePiece::new(
                        format!("deploy checklist with many other words {i}"),
                        KnowledgeType::Note,
                    )
                    .with_id(format!("main-{i}"))
                    .with_space(Space::Main),
                )
                .unwrap();
        }
    }

    fn main_query(top_k: usize) -> PieceQuery {
        PieceQuery::new("deploy note", top_k)
            .with_filter(PieceFilter::new().with_spaces(vec![Space::Main]))
    }

    #[test]
    fn test_non_native_backend_widens_until_enough() {
        let store = DocumentPieceStore::new(Arc::new(InMemoryDocumentService::new()));
        seed(&store);
        assert!(!store.supports_space_filter());

        let results = space_aware_search(&store, &main_query(3)).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.piece.space == Space::Main));
    }

    #[test]
    fn test_native_backend_filters_directly() {
        let store = InMemoryPieceStore::new();
        seed(&store);
        let results = space_aware_search(&store, &main_query(2)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.piece.space == Space::Main));
    }

    #[test]
    fn test_no_spaces_is_plain_search() {
        let store = DocumentPieceStore::new(Arc::new(InMemoryDocumentService::new()));
        seed(&store);
        let results = space_aware_search(&store, &PieceQuery::new("deploy", 4)).unwrap();
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_filter_by_spaces() {
        let results = vec![
            ScoredPiece::new(
                KnowledgePiece::new("a", KnowledgeType::Fact).with_space(Space::Personal),
                0.5,
            ),
            ScoredPiece::new(KnowledgePiece::new("b", KnowledgeType::Fact), 0.4),
        ];
        assert_eq!(filter_by_spaces(results.clone(), &[]).len(), 2);
        assert_eq!(filter_by_spaces(results, &[Space::Personal]).len(), 1);
    }
}
