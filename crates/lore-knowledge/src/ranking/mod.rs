//! Ranking and fusion: hybrid RRF, MMR, temporal decay, space-aware search
//! and multi-query retrieval.

pub mod agentic;
pub mod decay;
pub mod fusion;
pub mod hybrid;
pub mod mmr;
pub mod space;

pub use agentic::{
    AgenticRetriever, AgenticSettings, LlmQueryDecomposer, QueryDecomposer, SubQuery, aggregate,
    merge_fallback,
};
pub use decay::TemporalDecay;
pub use fusion::{DEFAULT_RRF_K, FusionSource, RankedList, merge_keep_max, reciprocal_rank_fusion};
pub use hybrid::{HybridRetriever, HybridSettings};
pub use mmr::MmrReranker;
pub use space::{OVERFETCH_STEPS, filter_by_spaces, space_aware_search};
