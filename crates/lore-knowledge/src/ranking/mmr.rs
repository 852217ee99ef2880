//! Maximal marginal relevance re-ranking.
//!
//! `MMR(d) = λ · relevance(d) − (1 − λ) · max_{s ∈ selected} cos(d, s)`
//!
//! λ=1.0 is pure relevance (plain top-K), λ=0.0 maximal diversity. 0.7 is
//! the default.

use lore_config::MmrConfig;
use lore_types::{ScoredPiece, cosine_similarity};

/// Greedy diversity selection over embedded candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct MmrReranker {
    pub enabled: bool,
    pub lambda: f32,
}

impl Default for MmrReranker {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.7,
        }
    }
}

impl From<&MmrConfig> for MmrReranker {
    fn from(config: &MmrConfig) -> Self {
        Self {
            enabled: config.enabled,
            lambda: config.lambda.clamp(0.0, 1.0),
        }
    }
}

impl MmrReranker {
    pub fn new(lambda: f32) -> Self {
        Self {
            enabled: true,
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            lambda: 1.0,
        }
    }

    /// Select `min(top_k, candidates.len())` results.
    ///
    /// `candidates` should arrive ranked. Relevance is min-max normalized to
    /// `[0, 1]` before selection. Candidates without an embedding are
    /// appended, in input order, after the embedded ones run out. Scores
    /// are left as they were.
    pub fn rerank(&self, mut candidates: Vec<ScoredPiece>, top_k: usize) -> Vec<ScoredPiece> {
        if !self.enabled || candidates.len() <= top_k || self.lambda >= 1.0 {
            candidates.truncate(top_k);
            return candidates;
        }

        let relevance = normalized_relevance(&candidates);
        let (embedded, bare): (Vec<usize>, Vec<usize>) =
            (0..candidates.len()).partition(|&i| candidates[i].piece.embedding.is_some());

        let mut selected: Vec<usize> = Vec::with_capacity(top_k);
        let mut remaining = embedded;

        while selected.len() < top_k && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (pos, &i) in remaining.iter().enumerate() {
                let score = self.mmr_score(i, &selected, &candidates, &relevance);
                // strict comparison keeps the earlier (higher-ranked) candidate on ties
                if score > best_score {
                    best_score = score;
                    best_pos = pos;
                }
            }
            selected.push(remaining.remove(best_pos));
        }

        for i in bare {
            if selected.len() >= top_k {
                break;
            }
            selected.push(i);
        }

        let mut slots: Vec<Option<ScoredPiece>> = candidates.drain(..).map(Some).collect();
        selected
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect()
    }

    fn mmr_score(
        &self,
        candidate: usize,
        selected: &[usize],
        candidates: &[ScoredPiece],
        relevance: &[f32],
    ) -> f32 {
        let Some(embedding) = candidates[candidate].piece.embedding.as_deref() else {
            return f32::NEG_INFINITY;
        };
        let max_sim = selected
            .iter()
            .filter_map(|&s| candidates[s].piece.embedding.as_deref())
            .map(|other| cosine_similarity(embedding, other))
            .fold(0.0_f32, f32::max);
        self.lambda * relevance[candidate] - (1.0 - self.lambda) * max_sim
    }
}

/// Min-max normalize scores; a constant list normalizes to all ones.
fn normalized_relevance(candidates: &[ScoredPiece]) -> Vec<f32> {
    let (min, max) = candidates
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c.score), hi.max(c.score))
        });
    let range = max - min;
    candidates
        .iter()
        .map(|c| {
            if range <= f32::EPSILON {
                1.0
            } else {
                (c.score - min) / range
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_types::{KnowledgePiece, KnowledgeType};

    fn candidate(id: &str, score: f32, embedding: Option<Vec<f32>>) -> ScoredPiece {
        let mut piece = KnowledgePiece::new(format!("content {id}"), KnowledgeType::Fact).with_id(id);
        piece.embedding = embedding;
        ScoredPiece::new(piece, score)
    }

    fn ids(results: &[ScoredPiece]) -> Vec<&str> {
        results.iter().map(|r| r.id()).collect()
    }

    fn near_duplicates() -> Vec<ScoredPiece> {
        vec![
            candidate("a", 0.95, Some(vec![1.0, 0.0, 0.0])),
            candidate("b", 0.94, Some(vec![0.99, 0.01, 0.0])),
            candidate("c", 0.70, Some(vec![0.0, 1.0, 0.0])),
            candidate("d", 0.60, Some(vec![0.0, 0.0, 1.0])),
        ]
    }

    #[test]
    fn test_lambda_one_is_plain_top_k() {
        let results = MmrReranker::new(1.0).rerank(near_duplicates(), 2);
        assert_eq!(ids(&results), vec!["a", "b"]);
    }

    #[test]
    fn test_diversity_skips_near_duplicate() {
        let results = MmrReranker::new(0.5).rerank(near_duplicates(), 2);
        assert_eq!(ids(&results), vec!["a", "c"]);
    }

    #[test]
    fn test_output_is_subset_of_requested_size() {
        let input = near_duplicates();
        for top_k in 0..6 {
            let results = MmrReranker::new(0.3).rerank(input.clone(), top_k);
            assert_eq!(results.len(), top_k.min(input.len()));
            for r in &results {
                assert!(input.iter().any(|c| c.id() == r.id()));
            }
        }
    }

    #[test]
    fn test_unembedded_candidates_go_last() {
        let input = vec![
            candidate("bare", 0.99, None),
            candidate("a", 0.9, Some(vec![1.0, 0.0])),
            candidate("b", 0.5, Some(vec![0.0, 1.0])),
            candidate("bare2", 0.2, None),
        ];
        let results = MmrReranker::new(0.7).rerank(input, 3);
        assert_eq!(ids(&results), vec!["a", "b", "bare"]);
    }

    #[test]
    fn test_noop_when_disabled_or_small_input() {
        let results = MmrReranker::disabled().rerank(near_duplicates(), 3);
        assert_eq!(ids(&results), vec!["a", "b", "c"]);

        let results = MmrReranker::new(0.1).rerank(near_duplicates(), 10);
        assert_eq!(ids(&results), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_scores_are_preserved() {
        let results = MmrReranker::new(0.5).rerank(near_duplicates(), 2);
        assert_eq!(results[1].score, 0.70);
    }
}
