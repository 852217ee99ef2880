//! Store traits for pluggable storage.
//!
//! Three backend-agnostic contracts, one per kind of knowledge:
//!
//! - [`MetadataStore`]: structured property bags keyed by entity
//! - [`KnowledgePieceStore`]: unstructured text pieces with search
//! - [`EntityGraphStore`]: typed nodes and edges between entities
//!
//! Implementations can use different storage technologies (SQLite, an
//! in-process map, an external document service) while providing a
//! consistent interface. All traits are `Send + Sync` so stores can be
//! shared across tasks behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use lore_types::{EntityMetadata, Id, KnowledgePiece, KnowledgeType, ScoredPiece, Space};

use crate::error::{MemoryError, Result};
use crate::graph::{EdgeDirection, GraphEdge, GraphNode, bfs_neighbors};

// ─────────────────────────────────────────────────────────────────────────────
// Query Types
// ─────────────────────────────────────────────────────────────────────────────

/// Which owners' pieces a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntityScope {
    /// Pieces of every owner, global included.
    #[default]
    Any,
    /// Only global pieces (`entity_id` is none).
    Global,
    /// Only pieces owned by this entity.
    Entity(Id),
}

impl EntityScope {
    /// Scope for an optional entity: `None` means global.
    pub fn from_entity(entity_id: Option<&str>) -> Self {
        match entity_id {
            Some(id) => EntityScope::Entity(id.to_string()),
            None => EntityScope::Global,
        }
    }

    pub fn matches(&self, piece: &KnowledgePiece) -> bool {
        match self {
            EntityScope::Any => true,
            EntityScope::Global => piece.entity_id.is_none(),
            EntityScope::Entity(id) => piece.entity_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// Filters shared by listing and searching.
///
/// Empty lists mean "no constraint". Tags, domains and spaces match on
/// any overlap; domains match either the primary or a secondary domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceFilter {
    pub scope: EntityScope,
    pub knowledge_types: Vec<KnowledgeType>,
    pub info_types: Vec<String>,
    pub tags: Vec<String>,
    pub domains: Vec<String>,
    pub spaces: Vec<Space>,
    /// Include retired (`is_active = false`) pieces.
    pub include_inactive: bool,
    /// Restrict on the `merge_processed` flag.
    pub merge_processed: Option<bool>,
}

impl PieceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: EntityScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_types(mut self, types: Vec<KnowledgeType>) -> Self {
        self.knowledge_types = types;
        self
    }

    pub fn with_info_types(mut self, info_types: Vec<String>) -> Self {
        self.info_types = info_types;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = lore_types::normalize_tags(tags);
        self
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_spaces(mut self, spaces: Vec<Space>) -> Self {
        self.spaces = spaces;
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn with_merge_processed(mut self, processed: bool) -> Self {
        self.merge_processed = Some(processed);
        self
    }

    /// The same filter with the space constraint removed.
    pub fn without_spaces(&self) -> Self {
        Self {
            spaces: Vec::new(),
            ..self.clone()
        }
    }

    /// Check a piece against every constraint, spaces included.
    pub fn matches(&self, piece: &KnowledgePiece) -> bool {
        self.matches_except_spaces(piece) && piece.in_any_space(&self.spaces)
    }

    /// Check a piece against every constraint except spaces.
    pub fn matches_except_spaces(&self, piece: &KnowledgePiece) -> bool {
        if !self.include_inactive && !piece.is_active {
            return false;
        }
        if !self.scope.matches(piece) {
            return false;
        }
        if !self.knowledge_types.is_empty() && !self.knowledge_types.contains(&piece.knowledge_type)
        {
            return false;
        }
        if !self.info_types.is_empty() && !self.info_types.contains(&piece.info_type) {
            return false;
        }
        if !self.tags.is_empty() && !piece.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if !self.domains.is_empty() {
            let primary = piece
                .domain
                .as_ref()
                .is_some_and(|d| self.domains.contains(d));
            let secondary = piece
                .secondary_domains
                .iter()
                .any(|d| self.domains.contains(d));
            if !primary && !secondary {
                return false;
            }
        }
        if let Some(processed) = self.merge_processed
            && piece.merge_processed != processed
        {
            return false;
        }
        true
    }
}

/// A ranked search request.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceQuery {
    pub text: String,
    /// Precomputed query embedding; stores without one fall back to keywords.
    pub embedding: Option<Vec<f32>>,
    pub filter: PieceFilter,
    pub top_k: usize,
}

impl PieceQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            embedding: None,
            filter: PieceFilter::default(),
            top_k,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_filter(mut self, filter: PieceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Piece counts for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub with_embeddings: usize,
    /// Active pieces per space; multi-space pieces count in each.
    pub per_space: BTreeMap<String, usize>,
}

impl StoreStats {
    /// Tally stats from a full listing.
    pub fn from_pieces<'a>(pieces: impl IntoIterator<Item = &'a KnowledgePiece>) -> Self {
        let mut stats = StoreStats::default();
        for piece in pieces {
            stats.total += 1;
            if piece.embedding.is_some() {
                stats.with_embeddings += 1;
            }
            if !piece.is_active {
                stats.inactive += 1;
                continue;
            }
            stats.active += 1;
            let spaces = if piece.spaces.is_empty() {
                vec![piece.space]
            } else {
                piece.spaces.clone()
            };
            for space in spaces {
                *stats.per_space.entry(space.to_string()).or_default() += 1;
            }
        }
        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata Store
// ─────────────────────────────────────────────────────────────────────────────

/// Storage for per-entity structured metadata.
pub trait MetadataStore: Send + Sync {
    /// Get the metadata for an entity. Returns `Ok(None)` if absent.
    fn get(&self, entity_id: &str) -> Result<Option<EntityMetadata>>;

    /// Upsert metadata, fully overwriting any previous record.
    fn save(&self, metadata: &EntityMetadata) -> Result<()>;

    /// Delete an entity's metadata.
    ///
    /// Returns `true` if it existed and was deleted, `false` if not found.
    fn delete(&self, entity_id: &str) -> Result<bool>;

    /// List entity ids, optionally restricted to one entity type.
    fn list_entities(&self, entity_type: Option<&str>) -> Result<Vec<Id>>;

    /// Release backend resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Knowledge Piece Store
// ─────────────────────────────────────────────────────────────────────────────

/// Storage and search for knowledge pieces.
///
/// Search results carry a score in `[0, 1]` and are ordered by descending
/// score, ties broken by piece id ascending.
pub trait KnowledgePieceStore: Send + Sync {
    /// Insert a new piece.
    ///
    /// # Errors
    ///
    /// Returns `Duplicate` if a piece with the same id exists.
    fn add(&self, piece: &KnowledgePiece) -> Result<Id>;

    /// Get a piece by id, active or not. Returns `Ok(None)` if absent.
    fn get(&self, piece_id: &str) -> Result<Option<KnowledgePiece>>;

    /// Overwrite an existing piece. Returns `false` if the id is unknown.
    fn update(&self, piece: &KnowledgePiece) -> Result<bool>;

    /// Physically remove a piece. Returns `false` if the id is unknown.
    fn remove(&self, piece_id: &str) -> Result<bool>;

    /// Ranked search honoring every constraint in `query.filter`.
    ///
    /// Backends that return `false` from [`supports_space_filter`]
    /// ignore `filter.spaces`; callers post-filter.
    ///
    /// [`supports_space_filter`]: KnowledgePieceStore::supports_space_filter
    fn search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>>;

    /// All pieces matching the filter, ordered by id.
    fn list_all(&self, filter: &PieceFilter) -> Result<Vec<KnowledgePiece>>;

    /// Find an active piece by content hash within a scope.
    ///
    /// The default implementation is a linear scan over [`list_all`].
    ///
    /// [`list_all`]: KnowledgePieceStore::list_all
    fn find_by_content_hash(
        &self,
        content_hash: &str,
        scope: &EntityScope,
    ) -> Result<Option<KnowledgePiece>> {
        let filter = PieceFilter::new().with_scope(scope.clone());
        Ok(self
            .list_all(&filter)?
            .into_iter()
            .find(|p| p.content_hash == content_hash))
    }

    /// Whether `search` applies `filter.spaces` natively.
    fn supports_space_filter(&self) -> bool {
        false
    }

    /// Vector-only ranking, for hybrid fusion.
    fn vector_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let _ = query;
        Err(MemoryError::Unsupported("vector_search".to_string()))
    }

    /// Keyword-only ranking, for hybrid fusion.
    fn keyword_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let _ = query;
        Err(MemoryError::Unsupported("keyword_search".to_string()))
    }

    /// Piece counts.
    fn stats(&self) -> Result<StoreStats> {
        let pieces = self.list_all(&PieceFilter::new().including_inactive())?;
        Ok(StoreStats::from_pieces(&pieces))
    }

    /// Release backend resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Graph Store
// ─────────────────────────────────────────────────────────────────────────────

/// Storage for typed relations between entities.
pub trait EntityGraphStore: Send + Sync {
    /// Get a node by id.
    fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>>;

    /// Edges touching a node in the given direction.
    fn get_relations(&self, node_id: &str, direction: EdgeDirection) -> Result<Vec<GraphEdge>>;

    /// Insert or replace a node.
    fn add_node(&self, node: &GraphNode) -> Result<()>;

    /// Insert or replace an edge (identity: source, target, type).
    fn add_edge(&self, edge: &GraphEdge) -> Result<()>;

    /// Remove a node and every edge touching it.
    fn remove_node(&self, node_id: &str) -> Result<bool>;

    /// Nodes reachable within `depth` hops, each with its shortest depth.
    fn get_neighbors(&self, node_id: &str, depth: usize) -> Result<Vec<(GraphNode, usize)>> {
        bfs_neighbors(self, node_id, depth)
    }

    /// Release backend resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared store handles.
pub type SharedMetadataStore = Arc<dyn MetadataStore>;
pub type SharedPieceStore = Arc<dyn KnowledgePieceStore>;
pub type SharedGraphStore = Arc<dyn EntityGraphStore>;
