//! Lightweight scoring used by the in-process adapters.
//!
//! The SQLite adapter delegates keyword relevance to FTS5 `bm25()`; the
//! in-memory and document adapters use term coverage instead.

use std::collections::BTreeSet;

use lore_types::cosine_similarity;

/// Lowercased alphanumeric terms of at least two characters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of distinct query terms present in `content`, in `[0, 1]`.
pub fn keyword_score(query: &str, content: &str) -> f32 {
    let terms = tokenize(query);
    if terms.is_empty() {
        return 0.0;
    }
    let words = tokenize(content);
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    hits as f32 / terms.len() as f32
}

/// Cosine similarity clamped into `[0, 1]`.
pub fn vector_score(query: &[f32], embedding: &[f32]) -> f32 {
    cosine_similarity(query, embedding).clamp(0.0, 1.0)
}

/// Blend vector and keyword sub-scores: `α·v + (1-α)·k`.
///
/// When only one signal is present it is used unweighted.
pub fn blend(alpha: f32, vector: Option<f32>, keyword: Option<f32>) -> f32 {
    match (vector, keyword) {
        (Some(v), Some(k)) => alpha * v + (1.0 - alpha) * k,
        (Some(v), None) => v,
        (None, Some(k)) => k,
        (None, None) => 0.0,
    }
}

/// Divide each value by the maximum so the best becomes 1.0.
pub fn max_normalize(values: &mut [f32]) {
    let max = values.iter().copied().fold(0.0_f32, f32::max);
    if max > 0.0 {
        for v in values.iter_mut() {
            *v /= max;
        }
    }
}
