//! Reciprocal rank fusion.
//!
//! `RRF(d) = Σᵢ wᵢ / (k + rankᵢ(d) + 1)` where `rankᵢ` is 0-indexed and the
//! sum runs over the lists `d` appears in. Scores are rank-based, so lists
//! with incomparable score scales fuse cleanly.

use std::collections::HashMap;

use lore_types::{Id, ScoredPiece, sort_scored};

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Which signal a ranked list came from; decides where its raw score is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionSource {
    Vector,
    Keyword,
    Other,
}

/// One ranked input list with its fusion weight.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub source: FusionSource,
    pub weight: f32,
    /// Results in rank order (best first).
    pub results: Vec<ScoredPiece>,
}

impl RankedList {
    pub fn new(source: FusionSource, weight: f32, results: Vec<ScoredPiece>) -> Self {
        Self {
            source,
            weight,
            results,
        }
    }
}

/// Fuse ranked lists with weighted RRF.
///
/// The fused score replaces the input scores; each input's raw score is
/// kept as the vector or keyword sub-score. Negative weights count as zero,
/// so every fused score is non-negative. Output is sorted by score
/// descending, ties by piece id ascending.
pub fn reciprocal_rank_fusion(lists: Vec<RankedList>, k: f32) -> Vec<ScoredPiece> {
    let k = k.max(0.0);
    let capacity: usize = lists.iter().map(|l| l.results.len()).sum();
    let mut fused: HashMap<Id, ScoredPiece> = HashMap::with_capacity(capacity);

    for list in lists {
        let weight = list.weight.max(0.0);
        for (rank, result) in list.results.into_iter().enumerate() {
            let contribution = weight / (k + rank as f32 + 1.0);
            let raw = result.score;
            let entry = fused
                .entry(result.piece.piece_id.clone())
                .or_insert_with(|| ScoredPiece::new(result.piece, 0.0));
            entry.score += contribution;
            match list.source {
                FusionSource::Vector => {
                    entry.vector_score = Some(entry.vector_score.map_or(raw, |v| v.max(raw)))
                }
                FusionSource::Keyword => {
                    entry.keyword_score = Some(entry.keyword_score.map_or(raw, |v| v.max(raw)))
                }
                FusionSource::Other => {}
            }
        }
    }

    let mut results: Vec<ScoredPiece> = fused.into_values().collect();
    sort_scored(&mut results);
    results
}

/// Merge result sets by piece id keeping the higher score, then sort.
pub fn merge_keep_max(sets: impl IntoIterator<Item = Vec<ScoredPiece>>) -> Vec<ScoredPiece> {
    let mut merged: HashMap<Id, ScoredPiece> = HashMap::new();
    for set in sets {
        for result in set {
            match merged.get(result.id()) {
                Some(existing) if existing.score >= result.score => {}
                _ => {
                    merged.insert(result.piece.piece_id.clone(), result);
                }
            }
        }
    }
    let mut results: Vec<ScoredPiece> = merged.into_values().collect();
    sort_scored(&mut results);
    results
}
