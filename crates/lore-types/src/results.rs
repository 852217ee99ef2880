//! Immutable outcome records returned by lifecycle and retrieval operations.

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Id;
use crate::enums::{DedupAction, MergeAction, MergeStrategy, ValidationCategory};
use crate::piece::KnowledgePiece;

// ─────────────────────────────────────────────────────────────────────────────
// Deduplication
// ─────────────────────────────────────────────────────────────────────────────

/// Decision of the three-tier deduplicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupResult {
    pub action: DedupAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_piece_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Set when the judge found the new piece contradicts the match.
    #[serde(default)]
    pub contradiction: bool,
}

impl DedupResult {
    /// Store the piece as new.
    pub fn add(reason: impl Into<String>) -> Self {
        Self {
            action: DedupAction::Add,
            reason: reason.into(),
            matched_piece_id: None,
            similarity: None,
            contradiction: false,
        }
    }

    /// Drop the piece as a duplicate of `matched`.
    pub fn no_op(matched: impl Into<Id>, similarity: f32, reason: impl Into<String>) -> Self {
        Self {
            action: DedupAction::NoOp,
            reason: reason.into(),
            matched_piece_id: Some(matched.into()),
            similarity: Some(similarity),
            contradiction: false,
        }
    }

    pub fn with_match(mut self, matched: impl Into<Id>, similarity: f32) -> Self {
        self.matched_piece_id = Some(matched.into());
        self.similarity = Some(similarity);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// An existing piece similar enough to be merged with an incoming one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub existing: KnowledgePiece,
    pub similarity: f32,
}

/// Outcome of applying a merge strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub action: MergeAction,
    pub strategy: MergeStrategy,
    /// The piece after processing: the merged superseding version, the
    /// incoming piece with a suggestion attached, or the input unchanged.
    pub piece: KnowledgePiece,
    /// Id of the existing piece that was merged or suggested against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Id>,
    pub reason: String,
}

impl MergeResult {
    pub fn new(
        action: MergeAction,
        strategy: MergeStrategy,
        piece: KnowledgePiece,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            strategy,
            piece,
            target_id: None,
            reason: reason.into(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<Id>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of content validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// `passed / (passed + failed)`, or 1.0 when nothing was checked.
    pub confidence: f32,
    pub passed: Vec<ValidationCategory>,
    pub failed: Vec<ValidationCategory>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    /// Build a result from the check outcome; validity and confidence are derived.
    pub fn from_checks(
        passed: Vec<ValidationCategory>,
        failed: Vec<ValidationCategory>,
        issues: Vec<String>,
        suggestions: Vec<String>,
    ) -> Self {
        let total = passed.len() + failed.len();
        let confidence = if total == 0 {
            1.0
        } else {
            passed.len() as f32 / total as f32
        };
        Self {
            is_valid: failed.is_empty(),
            confidence,
            passed,
            failed,
            issues,
            suggestions,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scoring
// ─────────────────────────────────────────────────────────────────────────────

/// A piece with a relevance score in `[0, 1]` (fused scores may exceed 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPiece {
    pub piece: KnowledgePiece,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f32>,
}

impl ScoredPiece {
    pub fn new(piece: KnowledgePiece, score: f32) -> Self {
        Self {
            piece,
            score,
            vector_score: None,
            keyword_score: None,
        }
    }

    pub fn with_sub_scores(mut self, vector: Option<f32>, keyword: Option<f32>) -> Self {
        self.vector_score = vector;
        self.keyword_score = keyword;
        self
    }

    pub fn id(&self) -> &str {
        &self.piece.piece_id
    }
}

/// Ordering used everywhere results are ranked: score descending, id ascending.
pub fn compare_scored(a: &ScoredPiece, b: &ScoredPiece) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.piece.piece_id.cmp(&b.piece.piece_id))
}

/// Sort in place by score descending, ties broken by piece id ascending.
pub fn sort_scored(results: &mut [ScoredPiece]) {
    results.sort_by(compare_scored);
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a lifecycle operation (update, delete, restore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_piece_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(operation: impl Into<String>, piece_id: impl Into<Id>) -> Self {
        Self {
            success: true,
            operation: operation.into(),
            piece_id: Some(piece_id.into()),
            new_piece_id: None,
            old_version: None,
            new_version: None,
            message: None,
            error: None,
        }
    }

    pub fn failed(
        operation: impl Into<String>,
        piece_id: Option<Id>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            operation: operation.into(),
            piece_id,
            new_piece_id: None,
            old_version: None,
            new_version: None,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn with_versions(mut self, old: u32, new: u32) -> Self {
        self.old_version = Some(old);
        self.new_version = Some(new);
        self
    }

    pub fn with_new_piece(mut self, id: impl Into<Id>) -> Self {
        self.new_piece_id = Some(id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.piece_id.as_deref().unwrap_or("-");
        if self.success {
            write!(f, "{} {}: ok", self.operation, id)?;
            if let Some(new_id) = &self.new_piece_id {
                write!(f, " -> {}", new_id)?;
            }
            if let (Some(old), Some(new)) = (self.old_version, self.new_version) {
                write!(f, " (v{} -> v{})", old, new)?;
            }
            if let Some(msg) = &self.message {
                write!(f, " [{}]", msg)?;
            }
            Ok(())
        } else {
            write!(
                f,
                "{} {}: failed: {}",
                self.operation,
                id,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background jobs
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate outcome of a background merge run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeJobResult {
    /// Pieces examined.
    pub processed: usize,
    /// Pieces merged into a superseding version.
    pub merged: usize,
    /// Pieces that received a pending suggestion.
    pub suggestions: usize,
    /// Per-piece failures (non-fatal).
    pub errors: Vec<String>,
    pub duration: Duration,
    /// Set when the run stopped early on cancellation.
    #[serde(default)]
    pub cancelled: bool,
}

impl MergeJobResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for MergeJobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MergeJobResult {{ processed: {}, merged: {}, suggestions: {}, errors: {}, duration: {}ms{} }}",
            self.processed,
            self.merged,
            self.suggestions,
            self.errors.len(),
            self.duration.as_millis(),
            if self.cancelled { ", cancelled" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::KnowledgeType;

    fn scored(id: &str, score: f32) -> ScoredPiece {
        ScoredPiece::new(KnowledgePiece::new(id, KnowledgeType::Fact).with_id(id), score)
    }

    #[test]
    fn test_sort_breaks_ties_by_id() {
        let mut results = vec![scored("c", 0.5), scored("a", 0.5), scored("b", 0.9)];
        sort_scored(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_validation_confidence() {
        let result = ValidationResult::from_checks(
            vec![ValidationCategory::Credentials, ValidationCategory::Pii],
            vec![ValidationCategory::Correctness],
            vec!["wrong".into()],
            vec![],
        );
        assert!(!result.is_valid);
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-6);

        let empty = ValidationResult::from_checks(vec![], vec![], vec![], vec![]);
        assert!(empty.is_valid);
        assert_eq!(empty.confidence, 1.0);
    }

    #[test]
    fn test_operation_result_display() {
        let ok = OperationResult::ok("update", "p1")
            .with_new_piece("p2")
            .with_versions(1, 2);
        assert_eq!(ok.to_string(), "update p1: ok -> p2 (v1 -> v2)");

        let failed = OperationResult::failed("restore", Some("p1".into()), "superseded");
        assert_eq!(failed.to_string(), "restore p1: failed: superseded");
    }

    #[test]
    fn test_merge_job_result_display() {
        let result = MergeJobResult {
            processed: 4,
            merged: 1,
            suggestions: 2,
            errors: vec!["boom".into()],
            duration: Duration::from_millis(15),
            cancelled: false,
        };
        let s = result.to_string();
        assert!(s.contains("processed: 4"));
        assert!(s.contains("errors: 1"));
        assert!(result.has_errors());
    }

    #[test]
    fn test_dedup_constructors() {
        let add = DedupResult::add("no match");
        assert_eq!(add.action, DedupAction::Add);
        assert!(add.matched_piece_id.is_none());

        let noop = DedupResult::no_op("p1", 1.0, "exact hash");
        assert_eq!(noop.action, DedupAction::NoOp);
        assert_eq!(noop.similarity, Some(1.0));
    }
}
