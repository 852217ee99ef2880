//! Periodic re-validation of stored pieces.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lore_memory::{PieceFilter, SharedPieceStore};
use lore_types::{Space, ValidationStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::validator::ContentValidator;

/// Outcome of one re-validation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevalidationReport {
    pub checked: usize,
    /// Pieces that were valid or pending and are now invalid.
    pub newly_invalid: usize,
    /// Pieces moved into the developmental space.
    pub moved: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub cancelled: bool,
}

impl RevalidationReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for RevalidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RevalidationReport {{ checked: {}, newly_invalid: {}, moved: {}, errors: {}, duration: {}ms{} }}",
            self.checked,
            self.newly_invalid,
            self.moved,
            self.errors.len(),
            self.duration.as_millis(),
            if self.cancelled { ", cancelled" } else { "" },
        )
    }
}

pub struct RevalidationJob {
    store: SharedPieceStore,
    validator: Arc<ContentValidator>,
}

impl RevalidationJob {
    pub fn new(store: SharedPieceStore, validator: Arc<ContentValidator>) -> Self {
        Self { store, validator }
    }

    pub fn spawn(self: Arc<Self>, space: Space, cancel: CancellationToken) -> JoinHandle<RevalidationReport> {
        tokio::spawn(async move { self.run(space, &cancel).await })
    }

    /// Re-run validation over the active pieces of `space`.
    pub async fn run(&self, space: Space, cancel: &CancellationToken) -> RevalidationReport {
        let start = Instant::now();
        let mut report = RevalidationReport::default();

        let pieces = match self.store.list_all(&PieceFilter::new().with_spaces(vec![space])) {
            Ok(p) => p,
            Err(e) => {
                report.errors.push(format!("list {}: {}", space, e));
                report.duration = start.elapsed();
                return report;
            }
        };

        for mut piece in pieces.into_iter().filter(|p| p.in_any_space(&[space])) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.checked += 1;

            let was_invalid = piece.validation_status == ValidationStatus::Invalid;
            let was_developmental = piece.space == Space::Developmental;
            let result = self.validator.validate(&piece).await;
            self.validator.apply(&mut piece, &result);
            piece.touch();

            if let Err(e) = self.store.update(&piece) {
                warn!(piece_id = %piece.piece_id, error = %e, "Failed to record re-validation");
                report.errors.push(format!("{}: {}", piece.piece_id, e));
                continue;
            }
            if !result.is_valid && !was_invalid {
                report.newly_invalid += 1;
                debug!(piece_id = %piece.piece_id, issues = ?result.issues, "Piece became invalid");
            }
            if !was_developmental && piece.space == Space::Developmental {
                report.moved += 1;
            }
        }

        report.duration = start.elapsed();
        info!(
            space = %space,
            checked = report.checked,
            newly_invalid = report.newly_invalid,
            moved = report.moved,
            errors = report.errors.len(),
            "Re-validation complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lore_memory::{InMemoryPieceStore, KnowledgePieceStore};
    use lore_types::{KnowledgePiece, KnowledgeType, ValidationCategory};

    use crate::lifecycle::ValidationSettings;

    fn job(store: Arc<InMemoryPieceStore>) -> RevalidationJob {
        let validator = ContentValidator::new(ValidationSettings {
            categories: vec![ValidationCategory::Credentials, ValidationCategory::Pii],
            ..ValidationSettings::default()
        })
        .unwrap();
        RevalidationJob::new(store, Arc::new(validator))
    }

    #[tokio::test]
    async fn test_moves_newly_invalid_pieces() {
        let store = Arc::new(InMemoryPieceStore::new());
        store
            .add(&KnowledgePiece::new("contact ops@example.com", KnowledgeType::Fact).with_id("pii"))
            .unwrap();
        store
            .add(&KnowledgePiece::new("the build is green", KnowledgeType::Fact).with_id("ok"))
            .unwrap();

        let report = job(store.clone()).run(Space::Main, &CancellationToken::new()).await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.newly_invalid, 1);
        assert_eq!(report.moved, 1);

        let pii = store.get("pii").unwrap().unwrap();
        assert_eq!(pii.validation_status, ValidationStatus::Invalid);
        assert_eq!(pii.space, Space::Developmental);
        assert_eq!(store.get("ok").unwrap().unwrap().validation_status, ValidationStatus::Valid);

        // the moved piece is no longer in main
        let again = job(store).run(Space::Main, &CancellationToken::new()).await;
        assert_eq!(again.checked, 1);
        assert_eq!(again.newly_invalid, 0);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let store = Arc::new(InMemoryPieceStore::new());
        store
            .add(&KnowledgePiece::new("x", KnowledgeType::Fact))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = job(store).run(Space::Main, &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.checked, 0);
    }
}
