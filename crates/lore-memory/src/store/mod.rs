//! SQLite-backed store implementing all three store traits.
//!
//! One database file holds entity metadata, knowledge pieces and the
//! entity graph:
//!
//! - **Pieces**: a `pieces` table with an embedding BLOB, mirrored into an
//!   FTS5 table for keyword relevance
//! - **Vector search**: sqlite-vec `vec_distance_cosine` over the BLOBs
//! - **Graph**: `graph_nodes` / `graph_edges` tables, traversed breadth-first
//!
//! Hybrid search blends both signals as `α·vector + (1-α)·keyword`, each
//! max-normalized into `[0, 1]` first.

mod graph_ops;
mod metadata_ops;
mod piece_ops;
mod search_ops;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use lore_types::{EntityMetadata, Id, KnowledgePiece, ScoredPiece};

use crate::backend::{
    EntityGraphStore, EntityScope, KnowledgePieceStore, MetadataStore, PieceFilter, PieceQuery,
    StoreStats,
};
use crate::error::{MemoryError, Result};
use crate::graph::{EdgeDirection, GraphEdge, GraphNode};
use crate::in_memory::DEFAULT_HYBRID_ALPHA;
use crate::vector::init_vector_extension;

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Store
// ─────────────────────────────────────────────────────────────────────────────

/// Knowledge store backed by SQLite.
///
/// Uses WAL mode for better concurrent read performance. The connection is
/// serialized behind a mutex; callers on an async runtime should run store
/// calls on a blocking thread.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
    /// Weight of the vector signal in hybrid search.
    pub(crate) alpha: f32,
    /// Expected embedding dimensions, enforced on write when set.
    pub(crate) embedding_dims: Option<usize>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("alpha", &self.alpha)
            .field("embedding_dims", &self.embedding_dims)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the database file and initializes the schema if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                MemoryError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        init_vector_extension();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self::from_connection(conn);
        store.initialize()?;

        info!(path = %path.display(), "Knowledge store opened");
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        init_vector_extension();
        let conn = Connection::open_in_memory()?;
        let store = Self::from_connection(conn);
        store.initialize()?;

        debug!("In-memory knowledge store created");
        Ok(store)
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            alpha: DEFAULT_HYBRID_ALPHA,
            embedding_dims: None,
        }
    }

    /// Weight of the vector signal in hybrid search, clamped to `[0, 1]`.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    /// Reject embeddings whose length differs from `dims`.
    pub fn with_embedding_dims(mut self, dims: usize) -> Self {
        self.embedding_dims = Some(dims);
        self
    }

    /// Initialize the database with schema and pragmas.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::create_schema(&conn)
    }

    /// Create the database schema.
    fn create_schema(conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            -- Entity metadata: one property bag per entity
            CREATE TABLE IF NOT EXISTS entity_metadata (
                entity_id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                spaces TEXT NOT NULL DEFAULT '["main"]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entity_metadata_type
                ON entity_metadata(entity_type);

            -- Knowledge pieces: filter columns plus the full record as JSON
            CREATE TABLE IF NOT EXISTS pieces (
                id TEXT PRIMARY KEY,
                entity_id TEXT,
                knowledge_type TEXT NOT NULL,
                info_type TEXT NOT NULL,
                domain TEXT,
                secondary_domains TEXT NOT NULL DEFAULT '[]',
                tags TEXT NOT NULL DEFAULT '[]',
                spaces TEXT NOT NULL DEFAULT '["main"]',
                content_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                merge_processed INTEGER NOT NULL DEFAULT 0,
                supersedes TEXT,
                embedding BLOB,
                embedding_dims INTEGER,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pieces_content_hash
                ON pieces(content_hash);
            CREATE INDEX IF NOT EXISTS idx_pieces_entity_id
                ON pieces(entity_id);
            CREATE INDEX IF NOT EXISTS idx_pieces_supersedes
                ON pieces(supersedes);

            -- Full-text index over piece content and tags
            CREATE VIRTUAL TABLE IF NOT EXISTS pieces_fts USING fts5(
                piece_id UNINDEXED,
                content,
                tags
            );

            -- Entity graph
            CREATE TABLE IF NOT EXISTS graph_nodes (
                node_id TEXT PRIMARY KEY,
                node_type TEXT NOT NULL,
                label TEXT,
                properties TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS graph_edges (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (source_id, target_id, edge_type)
            );

            CREATE INDEX IF NOT EXISTS idx_graph_edges_target
                ON graph_edges(target_id);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Execute a function within a transaction.
    ///
    /// If the closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl MetadataStore for SqliteStore {
    fn get(&self, entity_id: &str) -> Result<Option<EntityMetadata>> {
        self.get_metadata(entity_id)
    }

    fn save(&self, metadata: &EntityMetadata) -> Result<()> {
        self.save_metadata(metadata)
    }

    fn delete(&self, entity_id: &str) -> Result<bool> {
        self.delete_metadata(entity_id)
    }

    fn list_entities(&self, entity_type: Option<&str>) -> Result<Vec<Id>> {
        self.list_metadata_entities(entity_type)
    }
}

impl KnowledgePieceStore for SqliteStore {
    fn add(&self, piece: &KnowledgePiece) -> Result<Id> {
        self.insert_piece(piece)
    }

    fn get(&self, piece_id: &str) -> Result<Option<KnowledgePiece>> {
        self.get_piece(piece_id)
    }

    fn update(&self, piece: &KnowledgePiece) -> Result<bool> {
        self.update_piece(piece)
    }

    fn remove(&self, piece_id: &str) -> Result<bool> {
        self.delete_piece(piece_id)
    }

    fn search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        self.hybrid_search(query)
    }

    fn list_all(&self, filter: &PieceFilter) -> Result<Vec<KnowledgePiece>> {
        self.list_pieces(filter)
    }

    fn find_by_content_hash(
        &self,
        content_hash: &str,
        scope: &EntityScope,
    ) -> Result<Option<KnowledgePiece>> {
        self.find_piece_by_hash(content_hash, scope)
    }

    fn supports_space_filter(&self) -> bool {
        true
    }

    fn vector_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        self.search_vectors(query)
    }

    fn keyword_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        self.search_keywords(query)
    }

    fn stats(&self) -> Result<StoreStats> {
        self.piece_stats()
    }
}

impl EntityGraphStore for SqliteStore {
    fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        self.get_graph_node(node_id)
    }

    fn get_relations(&self, node_id: &str, direction: EdgeDirection) -> Result<Vec<GraphEdge>> {
        self.get_graph_edges(node_id, direction)
    }

    fn add_node(&self, node: &GraphNode) -> Result<()> {
        self.upsert_graph_node(node)
    }

    fn add_edge(&self, edge: &GraphEdge) -> Result<()> {
        self.upsert_graph_edge(edge)
    }

    fn remove_node(&self, node_id: &str) -> Result<bool> {
        self.delete_graph_node(node_id)
    }
}
