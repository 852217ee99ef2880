//! Storage layer for the Lore knowledge engine.
//!
//! Three backend-agnostic store contracts and their adapters:
//!
//! ```text
//! ┌───────────────────┐  ┌──────────────────────┐  ┌───────────────────┐
//! │  MetadataStore    │  │  KnowledgePieceStore │  │  EntityGraphStore │
//! └─────────┬─────────┘  └──────────┬───────────┘  └─────────┬─────────┘
//!           │                       │                        │
//!   ┌───────┴───────────────────────┴────────────────────────┴───────┐
//!   │  SqliteStore      one file, sqlite-vec + FTS5 hybrid search     │
//!   │  InMemory*Store   map-backed, for tests and embedding           │
//!   │  DocumentPieceStore  over a generic DocumentService (pieces)    │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use lore_memory::{KnowledgePieceStore, PieceQuery, SqliteStore};
//! use lore_types::{KnowledgePiece, KnowledgeType};
//!
//! let store = SqliteStore::open("/tmp/lore.db")?;
//! store.add(&KnowledgePiece::new("Deploys go through cargo-dist", KnowledgeType::Fact))?;
//!
//! let results = store.search(&PieceQuery::new("how do deploys work", 5))?;
//! for r in results {
//!     println!("{:.2} {}", r.score, r.piece.content);
//! }
//! # Ok::<(), lore_memory::MemoryError>(())
//! ```

pub mod backend;
pub mod document;
pub mod error;
pub mod graph;
pub mod in_memory;
pub mod scoring;
pub mod store;
pub mod validation;
pub mod vector;

pub use backend::{
    EntityGraphStore, EntityScope, KnowledgePieceStore, MetadataStore, PieceFilter, PieceQuery,
    SharedGraphStore, SharedMetadataStore, SharedPieceStore, StoreStats,
};
pub use document::{Document, DocumentPieceStore, DocumentService, InMemoryDocumentService};
pub use error::{MemoryError, Result};
pub use graph::{EdgeDirection, GraphEdge, GraphNode, PIECE_ID_PROPERTY};
pub use in_memory::{InMemoryGraphStore, InMemoryMetadataStore, InMemoryPieceStore};
pub use store::SqliteStore;
pub use validation::ValidationError;
