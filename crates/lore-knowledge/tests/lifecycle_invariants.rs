//! Lifecycle guarantees that span modules: atomic supersede, the restore
//! guard and threshold monotonicity of deduplication.

use std::sync::Arc;

use lore_knowledge::{
    DedupSettings, Deduplicator, Deleter, SimilarityBand, UpdateSettings, Updater,
};
use lore_memory::{InMemoryPieceStore, KnowledgePieceStore, MemoryError, PieceFilter, PieceQuery};
use lore_types::{DedupAction, DeleteMode, Id, KnowledgePiece, KnowledgeType, ScoredPiece};

/// Refuses every write that would deactivate a piece.
#[derive(Default)]
struct RetireRejectingStore {
    inner: InMemoryPieceStore,
}

impl KnowledgePieceStore for RetireRejectingStore {
    fn add(&self, piece: &KnowledgePiece) -> lore_memory::Result<Id> {
        self.inner.add(piece)
    }

    fn get(&self, piece_id: &str) -> lore_memory::Result<Option<KnowledgePiece>> {
        self.inner.get(piece_id)
    }

    fn update(&self, piece: &KnowledgePiece) -> lore_memory::Result<bool> {
        if !piece.is_active {
            return Err(MemoryError::Backend("read-only replica".into()));
        }
        self.inner.update(piece)
    }

    fn remove(&self, piece_id: &str) -> lore_memory::Result<bool> {
        self.inner.remove(piece_id)
    }

    fn search(&self, query: &PieceQuery) -> lore_memory::Result<Vec<ScoredPiece>> {
        self.inner.search(query)
    }

    fn list_all(&self, filter: &PieceFilter) -> lore_memory::Result<Vec<KnowledgePiece>> {
        self.inner.list_all(filter)
    }
}

fn history_settings() -> UpdateSettings {
    UpdateSettings {
        preserve_history: true,
        ..UpdateSettings::default()
    }
}

fn fact(id: &str, content: &str) -> KnowledgePiece {
    KnowledgePiece::new(content, KnowledgeType::Fact).with_id(id)
}

/// Unit vector whose cosine with `[1, 0]` is `similarity`.
fn at_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()]
}

// ─────────────────────────────────────────────────────────────────────────────
// Atomic supersede
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_leaves_exactly_one_active_version() {
    let store = Arc::new(InMemoryPieceStore::new());
    store.add(&fact("db", "staging runs postgres 14")).unwrap();
    let updater = Updater::new(store.clone(), history_settings());

    let result = updater.update_by_id("db", "staging runs postgres 16").await.unwrap();
    assert!(result.success);
    assert_eq!(result.old_version, Some(1));
    assert_eq!(result.new_version, Some(2));

    let new_id = result.new_piece_id.unwrap();
    let old = store.get("db").unwrap().unwrap();
    let new = store.get(&new_id).unwrap().unwrap();
    assert!(!old.is_active);
    assert!(new.is_active);
    assert_eq!(new.supersedes.as_deref(), Some("db"));
    assert_eq!(new.content, "staging runs postgres 16");

    let active = store.list_all(&PieceFilter::new()).unwrap();
    assert_eq!(active.len(), 1);

    let chain: Vec<Id> = updater
        .history(&new_id)
        .unwrap()
        .into_iter()
        .map(|p| p.piece_id)
        .collect();
    assert_eq!(chain, vec![new_id, "db".to_string()]);
}

#[tokio::test]
async fn failed_retire_rolls_back_new_version() {
    let store = Arc::new(RetireRejectingStore::default());
    store.add(&fact("db", "staging runs postgres 14")).unwrap();
    let updater = Updater::new(store.clone(), history_settings());

    let result = updater.update_by_id("db", "staging runs postgres 16").await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("read-only replica"));

    let all = store.list_all(&PieceFilter::new().including_inactive()).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].piece_id, "db");
    assert!(all[0].is_active);
    assert_eq!(all[0].content, "staging runs postgres 14");
}

// ─────────────────────────────────────────────────────────────────────────────
// Restore guard
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn superseded_version_cannot_be_restored_while_successor_is_active() {
    let store = Arc::new(InMemoryPieceStore::new());
    store.add(&fact("tz", "the team works in UTC")).unwrap();
    let updater = Updater::new(store.clone(), history_settings());
    let deleter = Deleter::new(store.clone());

    let new_id = updater
        .update_by_id("tz", "the team works in CET")
        .await
        .unwrap()
        .new_piece_id
        .unwrap();

    let refused = deleter.restore_by_id("tz").unwrap();
    assert!(!refused.success);
    assert!(refused.error.unwrap().contains(&new_id));
    assert!(!store.get("tz").unwrap().unwrap().is_active);

    assert!(deleter.delete_by_id(&new_id, DeleteMode::Soft).unwrap().success);
    let restored = deleter.restore_by_id("tz").unwrap();
    assert!(restored.success);
    assert!(store.get("tz").unwrap().unwrap().is_active);
}

// ─────────────────────────────────────────────────────────────────────────────
// Dedup monotonicity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn similarity_bands_never_decrease() {
    let settings = DedupSettings::default();
    let rank = |band: SimilarityBand| match band {
        SimilarityBand::Distinct => 0,
        SimilarityBand::Borderline => 1,
        SimilarityBand::Duplicate => 2,
    };

    let mut previous = 0;
    for step in 0..=100 {
        let similarity = step as f32 / 100.0;
        let current = rank(settings.band(similarity));
        assert!(current >= previous, "band dropped at similarity {}", similarity);
        previous = current;
    }
    assert_eq!(settings.band(settings.auto_threshold), SimilarityBand::Duplicate);
    assert_eq!(settings.band(settings.judge_threshold), SimilarityBand::Borderline);
}

#[tokio::test]
async fn dedup_decision_follows_thresholds() {
    let store = Arc::new(InMemoryPieceStore::new());
    store
        .add(&fact("stored", "deploys go out on tuesdays").with_embedding(vec![1.0, 0.0]))
        .unwrap();
    let dedup = Deduplicator::new(store.clone(), DedupSettings::default());

    let cases = [
        (0.99, DedupAction::NoOp),
        (0.985, DedupAction::NoOp),
        (0.90, DedupAction::Add),
        (0.50, DedupAction::Add),
    ];
    for (similarity, expected) in cases {
        let incoming = fact("incoming", &format!("deploys happen weekly ({})", similarity))
            .with_embedding(at_similarity(similarity));
        let result = dedup.deduplicate(&incoming).await.unwrap();
        assert_eq!(result.action, expected, "similarity {}", similarity);
        assert_eq!(result.matched_piece_id.as_deref(), Some("stored"));
    }
}

#[tokio::test]
async fn exact_content_is_a_duplicate_without_embeddings() {
    let store = Arc::new(InMemoryPieceStore::new());
    store.add(&fact("stored", "Deploys go out on Tuesdays")).unwrap();
    let dedup = Deduplicator::new(store, DedupSettings::default());

    let result = dedup
        .deduplicate(&fact("incoming", "  Deploys go out\n on Tuesdays "))
        .await
        .unwrap();
    assert_eq!(result.action, DedupAction::NoOp);
    assert_eq!(result.similarity, Some(1.0));
}
