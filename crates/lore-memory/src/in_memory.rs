//! In-process store adapters.
//!
//! Map-backed implementations of all three store traits. They honor the
//! same contracts as the SQLite adapter (including native space
//! filtering) and are used by tests and by callers embedding the engine
//! without persistence.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use lore_types::{EntityMetadata, Id, KnowledgePiece, ScoredPiece, sort_scored};

use crate::backend::{
    EntityGraphStore, KnowledgePieceStore, MetadataStore, PieceFilter, PieceQuery,
};
use crate::error::{MemoryError, Result};
use crate::graph::{EdgeDirection, GraphEdge, GraphNode};
use crate::scoring::{blend, keyword_score, vector_score};

/// Default weight of the vector signal when blending.
pub const DEFAULT_HYBRID_ALPHA: f32 = 0.7;

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Map-backed [`MetadataStore`].
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    entries: RwLock<BTreeMap<Id, EntityMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, entity_id: &str) -> Result<Option<EntityMetadata>> {
        Ok(self.entries.read().get(entity_id).cloned())
    }

    fn save(&self, metadata: &EntityMetadata) -> Result<()> {
        self.entries
            .write()
            .insert(metadata.entity_id.clone(), metadata.clone());
        Ok(())
    }

    fn delete(&self, entity_id: &str) -> Result<bool> {
        Ok(self.entries.write().remove(entity_id).is_some())
    }

    fn list_entities(&self, entity_type: Option<&str>) -> Result<Vec<Id>> {
        Ok(self
            .entries
            .read()
            .values()
            .filter(|m| entity_type.is_none_or(|t| m.entity_type == t))
            .map(|m| m.entity_id.clone())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pieces
// ─────────────────────────────────────────────────────────────────────────────

/// Map-backed [`KnowledgePieceStore`].
///
/// Search blends cosine similarity (when both the query and the piece carry
/// an embedding) with query-term coverage.
#[derive(Debug)]
pub struct InMemoryPieceStore {
    pieces: RwLock<BTreeMap<Id, KnowledgePiece>>,
    alpha: f32,
}

impl Default for InMemoryPieceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPieceStore {
    pub fn new() -> Self {
        Self {
            pieces: RwLock::new(BTreeMap::new()),
            alpha: DEFAULT_HYBRID_ALPHA,
        }
    }

    /// Weight of the vector signal when blending, clamped to `[0, 1]`.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().is_empty()
    }

    fn ranked<F>(&self, query: &PieceQuery, score: F) -> Vec<ScoredPiece>
    where
        F: Fn(&KnowledgePiece) -> Option<ScoredPiece>,
    {
        let pieces = self.pieces.read();
        let mut results: Vec<ScoredPiece> = pieces
            .values()
            .filter(|p| query.filter.matches(p))
            .filter_map(&score)
            .collect();
        sort_scored(&mut results);
        results.truncate(query.top_k);
        results
    }
}

impl KnowledgePieceStore for InMemoryPieceStore {
    fn add(&self, piece: &KnowledgePiece) -> Result<Id> {
        let mut pieces = self.pieces.write();
        if pieces.contains_key(&piece.piece_id) {
            return Err(MemoryError::Duplicate(piece.piece_id.clone()));
        }
        pieces.insert(piece.piece_id.clone(), piece.clone());
        Ok(piece.piece_id.clone())
    }

    fn get(&self, piece_id: &str) -> Result<Option<KnowledgePiece>> {
        Ok(self.pieces.read().get(piece_id).cloned())
    }

    fn update(&self, piece: &KnowledgePiece) -> Result<bool> {
        let mut pieces = self.pieces.write();
        match pieces.get_mut(&piece.piece_id) {
            Some(existing) => {
                *existing = piece.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, piece_id: &str) -> Result<bool> {
        Ok(self.pieces.write().remove(piece_id).is_some())
    }

    fn search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let has_text = !query.text.trim().is_empty();
        Ok(self.ranked(query, |p| {
            let vector = query
                .embedding
                .as_ref()
                .map(|q| p.embedding.as_ref().map_or(0.0, |e| vector_score(q, e)));
            let keyword = has_text.then(|| keyword_score(&query.text, &p.content));
            let score = blend(self.alpha, vector, keyword);
            (score > 0.0).then(|| ScoredPiece::new(p.clone(), score).with_sub_scores(vector, keyword))
        }))
    }

    fn list_all(&self, filter: &PieceFilter) -> Result<Vec<KnowledgePiece>> {
        Ok(self
            .pieces
            .read()
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    fn supports_space_filter(&self) -> bool {
        true
    }

    fn vector_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let Some(q) = query.embedding.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(self.ranked(query, |p| {
            p.embedding.as_ref().map(|e| {
                let score = vector_score(q, e);
                ScoredPiece::new(p.clone(), score).with_sub_scores(Some(score), None)
            })
        }))
    }

    fn keyword_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        Ok(self.ranked(query, |p| {
            let score = keyword_score(&query.text, &p.content);
            (score > 0.0)
                .then(|| ScoredPiece::new(p.clone(), score).with_sub_scores(None, Some(score)))
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

/// Map-backed [`EntityGraphStore`].
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    nodes: RwLock<BTreeMap<Id, GraphNode>>,
    edges: RwLock<Vec<GraphEdge>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }
}

impl EntityGraphStore for InMemoryGraphStore {
    fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        Ok(self.nodes.read().get(node_id).cloned())
    }

    fn get_relations(&self, node_id: &str, direction: EdgeDirection) -> Result<Vec<GraphEdge>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| direction.matches(e, node_id))
            .cloned()
            .collect())
    }

    fn add_node(&self, node: &GraphNode) -> Result<()> {
        self.nodes.write().insert(node.node_id.clone(), node.clone());
        Ok(())
    }

    fn add_edge(&self, edge: &GraphEdge) -> Result<()> {
        let mut edges = self.edges.write();
        match edges.iter_mut().find(|e| {
            e.source_id == edge.source_id
                && e.target_id == edge.target_id
                && e.edge_type == edge.edge_type
        }) {
            Some(existing) => *existing = edge.clone(),
            None => edges.push(edge.clone()),
        }
        Ok(())
    }

    fn remove_node(&self, node_id: &str) -> Result<bool> {
        let existed = self.nodes.write().remove(node_id).is_some();
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| e.source_id != node_id && e.target_id != node_id);
        Ok(existed || edges.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EntityScope;
    use lore_types::{KnowledgeType, Space};

    fn piece(id: &str, content: &str) -> KnowledgePiece {
        KnowledgePiece::new(content, KnowledgeType::Fact).with_id(id)
    }

    #[test]
    fn test_metadata_crud() {
        let store = InMemoryMetadataStore::new();
        let meta = EntityMetadata::new("user-1", "user").with_property("name", "Ada");
        store.save(&meta).unwrap();
        store.save(&EntityMetadata::new("repo-1", "repo")).unwrap();

        assert_eq!(store.get("user-1").unwrap().unwrap().get("name").unwrap(), "Ada");
        assert_eq!(store.list_entities(None).unwrap().len(), 2);
        assert_eq!(store.list_entities(Some("user")).unwrap(), vec!["user-1"]);
        assert!(store.delete("user-1").unwrap());
        assert!(!store.delete("user-1").unwrap());
        assert!(store.get("user-1").unwrap().is_none());
    }

    #[test]
    fn test_piece_add_rejects_duplicate_id() {
        let store = InMemoryPieceStore::new();
        store.add(&piece("p1", "one")).unwrap();
        let err = store.add(&piece("p1", "again")).unwrap_err();
        assert!(matches!(err, MemoryError::Duplicate(id) if id == "p1"));
    }

    #[test]
    fn test_piece_update_and_remove_missing() {
        let store = InMemoryPieceStore::new();
        assert!(!store.update(&piece("nope", "x")).unwrap());
        assert!(!store.remove("nope").unwrap());

        store.add(&piece("p1", "one")).unwrap();
        let mut p = store.get("p1").unwrap().unwrap();
        p.set_content("uno");
        assert!(store.update(&p).unwrap());
        assert_eq!(store.get("p1").unwrap().unwrap().content, "uno");
    }

    #[test]
    fn test_search_orders_by_score_then_id() {
        let store = InMemoryPieceStore::new();
        store.add(&piece("b", "rust tooling")).unwrap();
        store.add(&piece("a", "rust tooling")).unwrap();
        store.add(&piece("c", "rust")).unwrap();
        store.add(&piece("d", "python")).unwrap();

        let results = store.search(&PieceQuery::new("rust tooling", 10)).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_search_blends_vector_and_keyword() {
        let store = InMemoryPieceStore::new().with_alpha(0.5);
        store
            .add(&piece("v", "unrelated words").with_embedding(vec![1.0, 0.0]))
            .unwrap();
        store
            .add(&piece("k", "deploy steps").with_embedding(vec![0.0, 1.0]))
            .unwrap();

        let query = PieceQuery::new("deploy steps", 10).with_embedding(vec![1.0, 0.0]);
        let results = store.search(&query).unwrap();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!((r.score - 0.5).abs() < 1e-6);
        }
        assert_eq!(results[0].id(), "k");
    }

    #[test]
    fn test_search_native_space_filter() {
        let store = InMemoryPieceStore::new();
        store
            .add(&piece("main", "deploy").with_space(Space::Main))
            .unwrap();
        store
            .add(&piece("dev", "deploy").with_space(Space::Developmental))
            .unwrap();
        assert!(store.supports_space_filter());

        let filter = PieceFilter::new().with_spaces(vec![Space::Developmental]);
        let query = PieceQuery::new("deploy", 10).with_filter(filter);
        let results = store.search(&query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "dev");
    }

    #[test]
    fn test_find_by_content_hash_scoped() {
        let store = InMemoryPieceStore::new();
        let owned = piece("p1", "same  text").with_entity("user-1");
        store.add(&owned).unwrap();

        let hash = lore_types::content_hash("same text");
        let scope = EntityScope::Entity("user-1".into());
        assert_eq!(
            store.find_by_content_hash(&hash, &scope).unwrap().unwrap().piece_id,
            "p1"
        );
        assert!(
            store
                .find_by_content_hash(&hash, &EntityScope::Global)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_vector_and_keyword_search() {
        let store = InMemoryPieceStore::new();
        store
            .add(&piece("a", "alpha").with_embedding(vec![1.0, 0.0]))
            .unwrap();
        store.add(&piece("b", "beta")).unwrap();

        let q = PieceQuery::new("beta", 5).with_embedding(vec![1.0, 0.0]);
        let vector = store.vector_search(&q).unwrap();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].id(), "a");

        let keyword = store.keyword_search(&q).unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].id(), "b");
    }

    #[test]
    fn test_graph_neighbors_by_depth() {
        let graph = InMemoryGraphStore::new();
        graph.add_node(&GraphNode::new("user", "person")).unwrap();
        graph.add_node(&GraphNode::new("rust", "language")).unwrap();
        graph
            .add_edge(&GraphEdge::new("user", "rust", "uses").with_piece("p1"))
            .unwrap();
        graph.add_edge(&GraphEdge::new("rust", "cargo", "ships")).unwrap();
        graph.add_edge(&GraphEdge::new("cargo", "crates", "fetches")).unwrap();

        let neighbors = graph.get_neighbors("user", 2).unwrap();
        let found: Vec<(&str, usize)> = neighbors
            .iter()
            .map(|(n, d)| (n.node_id.as_str(), *d))
            .collect();
        assert_eq!(found, vec![("rust", 1), ("cargo", 2)]);
        assert_eq!(neighbors[0].0.node_type, "language");
        assert_eq!(neighbors[1].0.node_type, "entity");

        let out = graph.get_relations("user", EdgeDirection::Outgoing).unwrap();
        assert_eq!(out[0].piece_id(), Some("p1"));
        assert!(graph.get_relations("user", EdgeDirection::Incoming).unwrap().is_empty());
    }

    #[test]
    fn test_graph_edge_upsert_and_remove_node() {
        let graph = InMemoryGraphStore::new();
        graph.add_edge(&GraphEdge::new("a", "b", "knows")).unwrap();
        graph
            .add_edge(&GraphEdge::new("a", "b", "knows").with_piece("p9"))
            .unwrap();
        assert_eq!(graph.edge_count(), 1);

        assert!(graph.remove_node("b").unwrap());
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.remove_node("b").unwrap());
    }
}
