//! Retrieval orchestration, ranking, lifecycle and ingestion for Lore.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  KnowledgeBase                                              │
//! │  - retrieve(query) -> metadata + pieces + graph context     │
//! │  - add / update / remove pieces                             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                     │
//!          ▼                   ▼                     ▼
//!   ┌─────────────┐   ┌────────────────┐   ┌────────────────┐
//!   │ MetadataStore│   │KnowledgePiece- │   │EntityGraphStore│
//!   │             │   │Store + ranking │   │                │
//!   └─────────────┘   └────────────────┘   └────────────────┘
//!                              ▲
//!          ┌───────────────────┼────────────────────┐
//!          │                   │                    │
//!   ┌─────────────┐   ┌────────────────┐   ┌────────────────┐
//!   │  ingestion  │   │   lifecycle    │   │ background jobs│
//!   │ chunk/struct│   │ dedup/validate │   │ merge, revalid.│
//!   │ /load       │   │ merge/update/  │   │                │
//!   │             │   │ delete/skills  │   │                │
//!   └─────────────┘   └────────────────┘   └────────────────┘
//! ```
//!
//! Every write path stores the new version of a piece before retiring the
//! old one, so readers always see at least one active version.
//!
//! # Core Components
//!
//! - [`KnowledgeBase`]: the read path and basic CRUD
//! - [`ContextProvider`]: token-budgeted prompt sections from a retrieval
//! - [`lifecycle`]: dedup, validation, merge, update, delete, skill synthesis
//! - [`ingestion`]: markdown documents to stored knowledge

pub mod embedding;
pub mod error;
pub mod ingestion;
pub mod kb;
pub mod lifecycle;
pub mod provider;
pub mod ranking;
pub mod security;

pub use error::{KnowledgeError, Result};
pub use kb::{
    ANY_INFO_TYPE, GraphContext, KnowledgeBase, RetrievalRequest, RetrievalResult,
    RetrievalSettings, SearchStrategy,
};
pub use provider::{ContextProvider, PromptContext, PromptSection, ProviderSettings, estimate_tokens};
pub use security::SensitiveContentFilter;

// Re-export ranking types
pub use ranking::{
    AgenticRetriever, AgenticSettings, HybridRetriever, HybridSettings, LlmQueryDecomposer,
    MmrReranker, QueryDecomposer, SubQuery, TemporalDecay,
};

// Re-export lifecycle types
pub use lifecycle::{
    ContentValidator, DedupSettings, Deduplicator, Deleter, MergeJob, MergeSettings,
    MergeStrategyManager, RevalidationJob, RevalidationReport, SimilarityBand, SkillSettings,
    SkillSynthesizer, UpdateSettings, Updater, ValidationSettings,
};

// Re-export ingestion types
pub use ingestion::{
    Chunk, ChunkerSettings, DebugSession, DocumentIngester, IngestSettings, IngestionDocument,
    IngestionReport, MarkdownChunker,
};
