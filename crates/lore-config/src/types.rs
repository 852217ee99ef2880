//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [retrieval]              # orchestrator defaults
//! [retrieval.hybrid]       # RRF fusion
//! [retrieval.mmr]          # diversity re-ranking
//! [retrieval.decay]        # temporal decay
//! [retrieval.agentic]      # multi-query retrieval
//! [store]                  # SQLite backend
//! [dedup] [validation] [merge] [update] [skills]
//! [ingestion]              # chunking + structuring
//! [provider]               # prompt section budgets
//! [security]               # sensitive content patterns
//! [llm]                    # OpenAI-compatible endpoint
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use lore_types::{MergeStrategy, ValidationCategory};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged. Accessors return the section or its
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoreConfig {
    pub retrieval: Option<RetrievalConfig>,
    pub store: Option<StoreConfig>,
    pub dedup: Option<DedupConfig>,
    pub validation: Option<ValidationConfig>,
    pub merge: Option<MergeConfig>,
    pub update: Option<UpdateConfig>,
    pub skills: Option<SkillsConfig>,
    pub ingestion: Option<IngestionConfig>,
    pub provider: Option<ProviderConfig>,
    pub security: Option<SecurityConfig>,
    pub llm: Option<LlmConfig>,
}

impl LoreConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority, per section).
    pub fn merge(&mut self, other: LoreConfig) {
        if other.retrieval.is_some() {
            self.retrieval = other.retrieval;
        }
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.dedup.is_some() {
            self.dedup = other.dedup;
        }
        if other.validation.is_some() {
            self.validation = other.validation;
        }
        if other.merge.is_some() {
            self.merge = other.merge;
        }
        if other.update.is_some() {
            self.update = other.update;
        }
        if other.skills.is_some() {
            self.skills = other.skills;
        }
        if other.ingestion.is_some() {
            self.ingestion = other.ingestion;
        }
        if other.provider.is_some() {
            self.provider = other.provider;
        }
        if other.security.is_some() {
            self.security = other.security;
        }
        if other.llm.is_some() {
            self.llm = other.llm;
        }
    }

    pub fn retrieval(&self) -> RetrievalConfig {
        self.retrieval.clone().unwrap_or_default()
    }

    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    pub fn dedup(&self) -> DedupConfig {
        self.dedup.clone().unwrap_or_default()
    }

    pub fn validation(&self) -> ValidationConfig {
        self.validation.clone().unwrap_or_default()
    }

    pub fn merge_config(&self) -> MergeConfig {
        self.merge.clone().unwrap_or_default()
    }

    pub fn update(&self) -> UpdateConfig {
        self.update.clone().unwrap_or_default()
    }

    pub fn skills(&self) -> SkillsConfig {
        self.skills.clone().unwrap_or_default()
    }

    pub fn ingestion(&self) -> IngestionConfig {
        self.ingestion.clone().unwrap_or_default()
    }

    pub fn provider(&self) -> ProviderConfig {
        self.provider.clone().unwrap_or_default()
    }

    pub fn security(&self) -> SecurityConfig {
        self.security.clone().unwrap_or_default()
    }

    pub fn llm(&self) -> LlmConfig {
        self.llm.clone().unwrap_or_default()
    }

    /// Check ranges and cross-field constraints of every section.
    pub fn validate(&self) -> Result<()> {
        let retrieval = self.retrieval();
        unit_interval("retrieval.mmr.lambda", retrieval.mmr.lambda)?;
        unit_interval("retrieval.decay.min_multiplier", retrieval.decay.min_multiplier)?;
        if retrieval.decay.half_life_days <= 0.0 {
            return Err(ConfigError::invalid(
                "retrieval.decay.half_life_days",
                "must be positive",
            ));
        }
        if retrieval.hybrid.rrf_k < 0.0 {
            return Err(ConfigError::invalid("retrieval.hybrid.rrf_k", "must be >= 0"));
        }
        if retrieval.top_k == 0 {
            return Err(ConfigError::invalid("retrieval.top_k", "must be at least 1"));
        }

        unit_interval("store.hybrid_alpha", self.store().hybrid_alpha)?;

        let dedup = self.dedup();
        unit_interval("dedup.auto_threshold", dedup.auto_threshold)?;
        unit_interval("dedup.judge_threshold", dedup.judge_threshold)?;
        if dedup.judge_threshold > dedup.auto_threshold {
            return Err(ConfigError::invalid(
                "dedup.judge_threshold",
                format!(
                    "{} exceeds auto_threshold {}",
                    dedup.judge_threshold, dedup.auto_threshold
                ),
            ));
        }

        let ingestion = self.ingestion();
        if ingestion.max_chunk_chars == 0 {
            return Err(ConfigError::invalid(
                "ingestion.max_chunk_chars",
                "must be at least 1",
            ));
        }
        if ingestion.overlap_chars >= ingestion.max_chunk_chars {
            return Err(ConfigError::invalid(
                "ingestion.overlap_chars",
                "must be smaller than max_chunk_chars",
            ));
        }
        if ingestion.concurrency == 0 {
            return Err(ConfigError::invalid("ingestion.concurrency", "must be at least 1"));
        }
        Ok(())
    }
}

fn unit_interval(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{} is outside [0, 1]", value)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrator retrieval settings.
///
/// ```toml
/// [retrieval]
/// top_k = 10
/// min_results = 3
/// graph_depth = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum results a filtered search tier must return to be accepted.
    pub min_results: usize,
    /// Hops to traverse in the entity graph.
    pub graph_depth: usize,
    pub include_metadata: bool,
    pub include_global_metadata: bool,
    /// Info types whose graph-linked pieces are dropped when already
    /// surfaced by the piece search. `"*"` matches every info type.
    pub skip_retrieved_info_types: Vec<String>,
    pub hybrid: HybridConfig,
    pub mmr: MmrConfig,
    pub decay: DecayConfig,
    pub agentic: AgenticConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_results: 3,
            graph_depth: 2,
            include_metadata: true,
            include_global_metadata: true,
            skip_retrieved_info_types: vec!["*".to_string()],
            hybrid: HybridConfig::default(),
            mmr: MmrConfig::default(),
            decay: DecayConfig::default(),
            agentic: AgenticConfig::default(),
        }
    }
}

/// Reciprocal rank fusion of vector and keyword search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub enabled: bool,
    pub rrf_k: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Each source fetches `top_k * fetch_multiplier` candidates.
    pub fetch_multiplier: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rrf_k: 60.0,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            fetch_multiplier: 3,
        }
    }
}

/// Maximal marginal relevance re-ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmrConfig {
    pub enabled: bool,
    /// 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda: f32,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.7,
        }
    }
}

/// Exponential temporal decay of scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    pub half_life_days: f32,
    pub min_multiplier: f32,
    /// Info types exempt from decay.
    pub evergreen_info_types: Vec<String>,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_days: 30.0,
            min_multiplier: 0.1,
            evergreen_info_types: vec!["skills".to_string(), "instructions".to_string()],
        }
    }
}

/// How per-sub-query scores combine in multi-query retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// Highest weighted score wins.
    #[default]
    Max,
    /// Sum of weighted scores.
    #[serde(alias = "weighted-sum")]
    Sum,
}

/// Multi-query (agentic) retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgenticConfig {
    pub enabled: bool,
    pub aggregation: Aggregation,
    pub min_results: usize,
    pub max_sub_queries: usize,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            aggregation: Aggregation::Max,
            min_results: 3,
            max_sub_queries: 4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path. Defaults to the platform data dir.
    pub database_path: Option<PathBuf>,
    /// Blend weight of the vector score in hybrid search.
    pub hybrid_alpha: f32,
    pub embedding_dims: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            hybrid_alpha: 0.7,
            embedding_dims: 384,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Three-tier deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Above this similarity a piece is a duplicate.
    pub auto_threshold: f32,
    /// Below this similarity a piece is distinct.
    pub judge_threshold: f32,
    /// Neighbors compared in the embedding tier.
    pub neighbors: usize,
    /// Whether borderline matches go to the LLM judge.
    pub use_llm_judge: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_threshold: 0.98,
            judge_threshold: 0.85,
            neighbors: 5,
            use_llm_judge: true,
        }
    }
}

/// Content validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    pub categories: Vec<ValidationCategory>,
    /// Move invalid pieces into the developmental space instead of rejecting.
    pub route_invalid_to_developmental: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: ValidationCategory::ALL.to_vec(),
            route_invalid_to_developmental: true,
        }
    }
}

/// Merge strategy resolution and the background merge job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub enabled: bool,
    /// Minimum similarity for a merge candidate.
    pub similarity_threshold: f32,
    /// Strategy used when neither the piece nor the type table names one.
    pub default_strategy: MergeStrategy,
    /// Strategy per knowledge type (keys are knowledge type names).
    pub type_defaults: BTreeMap<String, MergeStrategy>,
    /// Pieces scanned per space in one merge job run.
    pub batch_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let type_defaults = [
            ("fact", MergeStrategy::AutoMergeOnIngest),
            ("preference", MergeStrategy::AutoMergeOnIngest),
            ("instruction", MergeStrategy::SuggestionOnIngest),
            ("procedure", MergeStrategy::ManualOnly),
            ("note", MergeStrategy::PostIngestionAuto),
            ("episodic", MergeStrategy::ManualOnly),
            ("example", MergeStrategy::PostIngestionSuggestion),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            enabled: true,
            similarity_threshold: 0.85,
            default_strategy: MergeStrategy::ManualOnly,
            type_defaults,
            batch_size: 100,
        }
    }
}

/// Versioned updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Supersede instead of updating in place.
    pub preserve_history: bool,
    /// Maximum pieces touched by one semantic update.
    pub max_updates: usize,
    /// Minimum similarity for a semantic update target.
    pub similarity_threshold: f32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            preserve_history: true,
            max_updates: 3,
            similarity_threshold: 0.8,
        }
    }
}

/// Skill synthesis from clusters of related pieces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    pub enabled: bool,
    /// Neighbors below this similarity are not part of the cluster.
    pub similarity_floor: f32,
    /// Cluster size, counting the new piece.
    pub min_cluster_size: usize,
    pub min_avg_similarity: f32,
    pub max_neighbors: usize,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_floor: 0.7,
            min_cluster_size: 3,
            min_avg_similarity: 0.75,
            max_neighbors: 10,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

/// Document chunking and LLM structuring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub max_chunk_chars: usize,
    /// Adjacent sections smaller than this are merged.
    pub min_chunk_chars: usize,
    pub overlap_chars: usize,
    /// Deepest header level that starts a new section.
    pub header_levels: usize,
    /// Extra structuring attempts per chunk after the first.
    pub max_retries: usize,
    /// Chunks structured in parallel.
    pub concurrency: usize,
    /// Run dedup/validation/merge on structured pieces before loading.
    pub enhance: bool,
    /// Root directory for debug sessions; none disables them.
    pub debug_dir: Option<PathBuf>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 4000,
            min_chunk_chars: 200,
            overlap_chars: 200,
            header_levels: 3,
            max_retries: 2,
            concurrency: 4,
            enhance: true,
            debug_dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context provider
// ─────────────────────────────────────────────────────────────────────────────

/// Token budgets for prompt sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Budget per section name (`skills`, `instructions`, `context`, ...).
    pub section_budgets: BTreeMap<String, usize>,
    /// Ceiling across all sections.
    pub total_budget: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        let section_budgets = [
            ("skills", 1000),
            ("instructions", 1000),
            ("context", 2000),
            ("episodic", 800),
            ("user_profile", 500),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            section_budgets,
            total_budget: 4000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────────────────────────────────────

/// Sensitive content screening for CRUD writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Apply the built-in credential/secret patterns.
    pub builtin_patterns: bool,
    /// Extra regexes; content matching any is rejected.
    pub sensitive_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            builtin_patterns: true,
            sensitive_patterns: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible completion and embedding endpoint.
///
/// ```toml
/// [llm]
/// base_url = "https://api.openai.com/v1"
/// model = "gpt-4o-mini"
/// embedding_model = "text-embedding-3-small"
/// api_key_env = "OPENAI_API_KEY"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Embedding dimensions requested from the endpoint, when it supports it.
    pub embedding_dims: Option<usize>,
    pub api_key_env: String,
    /// Plaintext key; prefer `api_key_env`.
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dims: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            max_retries: 3,
            timeout_secs: 60,
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    /// Whether the config carries a plaintext key.
    pub fn has_plaintext_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Resolve the API key: environment variable first, then the config file.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var(&self.api_key_env)
            && !key.is_empty()
        {
            return Ok(key);
        }
        match &self.api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(ConfigError::ApiKeyNotFound {
                env_var: self.api_key_env.clone(),
            }),
        }
    }
}
