//! Shared knowledge types for the Lore retrieval engine.
//!
//! Every layer of the engine (stores, ranking, lifecycle, ingestion) speaks in
//! terms of the value types defined here:
//!
//! - [`KnowledgePiece`]: a chunk of unstructured knowledge plus classification,
//!   version-chain, merge-workflow and validation metadata
//! - [`EntityMetadata`]: a keyed property bag per entity
//! - closed string-valued enumerations ([`Space`], [`MergeStrategy`], ...)
//! - immutable outcome records ([`DedupResult`], [`OperationResult`], ...)

pub mod enums;
pub mod error;
pub mod metadata;
pub mod piece;
pub mod results;
pub mod vector;

use chrono::{DateTime, Utc};

pub use enums::{
    DedupAction, DeleteMode, KnowledgeType, MergeAction, MergeStrategy, MergeType, Space,
    SuggestionStatus, UpdateAction, ValidationCategory, ValidationStatus,
};
pub use error::{Result, TypesError};
pub use metadata::{EntityMetadata, GLOBAL_ENTITY_ID};
pub use piece::{
    DEFAULT_INFO_TYPE, KnowledgePiece, content_hash, normalize_content, normalize_tags,
};
pub use results::{
    DedupResult, MergeCandidate, MergeJobResult, MergeResult, OperationResult, ScoredPiece,
    ValidationResult, compare_scored, sort_scored,
};
pub use vector::cosine_similarity;

/// Identifier type used for pieces, entities and graph nodes.
pub type Id = String;

/// UTC timestamp used across all records.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh opaque identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time.
pub fn now() -> Timestamp {
    Utc::now()
}
