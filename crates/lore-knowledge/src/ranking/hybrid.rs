//! Hybrid retrieval: concurrent vector and keyword search fused with RRF.

use lore_config::HybridConfig;
use lore_memory::{MemoryError, PieceQuery, SharedPieceStore};
use lore_types::ScoredPiece;
use tracing::{debug, warn};

use super::fusion::{DEFAULT_RRF_K, FusionSource, RankedList, reciprocal_rank_fusion};
use crate::error::{KnowledgeError, Result};

/// Fusion parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSettings {
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Each source fetches `top_k * fetch_multiplier` candidates.
    pub fetch_multiplier: usize,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            fetch_multiplier: 3,
        }
    }
}

impl From<&HybridConfig> for HybridSettings {
    fn from(config: &HybridConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            fetch_multiplier: config.fetch_multiplier.max(1),
        }
    }
}

/// Runs vector and keyword search side by side and fuses the rankings.
///
/// Either source may fail or be unsupported by the backend; the other one
/// still produces results. Only when both fail is an error returned.
pub struct HybridRetriever {
    store: SharedPieceStore,
    settings: HybridSettings,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HybridRetriever {
    pub fn new(store: SharedPieceStore, settings: HybridSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &HybridSettings {
        &self.settings
    }

    /// Fused candidates for `query`, at most `top_k * fetch_multiplier`.
    ///
    /// Callers post-filter and truncate to `query.top_k`.
    pub async fn search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let fetch = query
            .top_k
            .saturating_mul(self.settings.fetch_multiplier)
            .max(query.top_k);
        let fetch_query = query.clone().with_top_k(fetch);

        let vector_task = {
            let store = self.store.clone();
            let q = fetch_query.clone();
            tokio::task::spawn_blocking(move || {
                if q.embedding.is_none() {
                    return Ok(Vec::new());
                }
                store.vector_search(&q)
            })
        };
        let keyword_task = {
            let store = self.store.clone();
            let q = fetch_query.clone();
            tokio::task::spawn_blocking(move || {
                if q.text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                store.keyword_search(&q)
            })
        };

        let (vector, keyword) = tokio::join!(vector_task, keyword_task);
        let vector = settle("vector", vector);
        let keyword = settle("keyword", keyword);

        let (vector, keyword) = match (vector, keyword) {
            (Err(v), Err(k)) => {
                return Err(KnowledgeError::internal(format!(
                    "hybrid search failed: vector: {v}; keyword: {k}"
                )));
            }
            (v, k) => (v.unwrap_or_default(), k.unwrap_or_default()),
        };

        debug!(
            vector = vector.len(),
            keyword = keyword.len(),
            "Hybrid search candidates"
        );

        let mut fused = reciprocal_rank_fusion(
            vec![
                RankedList::new(FusionSource::Vector, self.settings.vector_weight, vector),
                RankedList::new(FusionSource::Keyword, self.settings.keyword_weight, keyword),
            ],
            self.settings.rrf_k,
        );
        fused.truncate(fetch);
        Ok(fused)
    }
}

/// Flatten a join result, logging the failure of one source.
fn settle(
    source: &str,
    joined: std::result::Result<lore_memory::Result<Vec<ScoredPiece>>, tokio::task::JoinError>,
) -> std::result::Result<Vec<ScoredPiece>, String> {
    match joined {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(MemoryError::Unsupported(op))) => {
            debug!(source, op = %op, "Search source unsupported by backend");
            Err(format!("{op} unsupported"))
        }
        Ok(Err(e)) => {
            warn!(source, error = %e, "Search source failed, continuing with the other");
            Err(e.to_string())
        }
        Err(e) => {
            warn!(source, error = %e, "Search task panicked or was cancelled");
            Err(e.to_string())
        }
    }
}
