//! CLI command handlers.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use console::{Style, style};
use lore_config::LoreConfig;
use lore_knowledge::{
    ContentValidator, DedupSettings, Deduplicator, KnowledgeBase, MergeSettings,
    MergeStrategyManager, ValidationSettings,
};
use lore_llm::{
    OpenAiCompleter, OpenAiConfig, OpenAiEmbedder, OpenAiEmbedderConfig, SharedCompleter,
    SharedEmbedder,
};
use lore_memory::SqliteStore;
use lore_types::{OperationResult, Space};
use tracing::{debug, warn};

pub mod add;
pub mod delete;
pub mod ingest;
pub mod merge_job;
pub mod query;
pub mod restore;
pub mod revalidate;
pub mod stats;
pub mod update;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: LoreConfig,
    /// Resolved database path.
    pub db_path: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

/// Components wired for one command invocation.
pub struct Services {
    pub store: Arc<SqliteStore>,
    pub kb: Arc<KnowledgeBase>,
    pub completer: Option<SharedCompleter>,
    pub embedder: Option<SharedEmbedder>,
}

impl Context {
    /// Resolve config and database path. `config_path` skips discovery.
    pub fn load(
        db: Option<PathBuf>,
        config_path: Option<&Path>,
        json_output: bool,
        verbose: bool,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => lore_config::load_config_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let loaded = lore_config::load_config(None)?;
                for warning in &loaded.warnings {
                    warn!("{}", warning);
                }
                debug!(sources = ?loaded.loaded_from(), "Loaded config");
                loaded.config
            }
        };

        let db_path = db
            .or_else(|| config.store().database_path)
            .unwrap_or_else(lore_config::default_database_path);

        Ok(Self {
            config,
            db_path,
            json_output,
            verbose,
        })
    }

    /// Open the database and wire the knowledge base.
    ///
    /// Without a resolvable API key every LLM-backed step degrades to its
    /// documented default.
    pub fn open(&self) -> Result<Services> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store_config = self.config.store();
        let store = Arc::new(
            SqliteStore::open(&self.db_path)?
                .with_alpha(store_config.hybrid_alpha)
                .with_embedding_dims(store_config.embedding_dims),
        );

        let (completer, embedder) = self.llm_clients()?;

        let mut kb = KnowledgeBase::from_config(store.clone(), &self.config)?
            .with_metadata_store(store.clone())
            .with_graph_store(store.clone());
        if let Some(embedder) = &embedder {
            kb = kb.with_embedder(embedder.clone());
        }

        Ok(Services {
            store,
            kb: Arc::new(kb),
            completer,
            embedder,
        })
    }

    fn llm_clients(&self) -> Result<(Option<SharedCompleter>, Option<SharedEmbedder>)> {
        let llm = self.config.llm();
        let key = match llm.resolve_api_key() {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "No LLM configured");
                return Ok((None, None));
            }
        };
        let timeout = Duration::from_secs(llm.timeout_secs);

        let completer = OpenAiCompleter::new(
            OpenAiConfig::openai(key.clone())
                .with_base_url(&llm.base_url)
                .with_model(&llm.model)
                .with_temperature(llm.temperature)
                .with_timeout(timeout)
                .with_max_retries(llm.max_retries),
        )?;

        let mut embedder_config = OpenAiEmbedderConfig::new(key)
            .with_base_url(&llm.base_url)
            .with_model(&llm.embedding_model)
            .with_timeout(timeout)
            .with_max_retries(llm.max_retries);
        if let Some(dims) = llm.embedding_dims {
            embedder_config = embedder_config.with_dimensions(dims);
        }
        let embedder = OpenAiEmbedder::new(embedder_config)?;

        Ok((Some(Arc::new(completer)), Some(Arc::new(embedder))))
    }
}

impl Services {
    pub fn deduplicator(&self, config: &LoreConfig) -> Deduplicator {
        let mut dedup = Deduplicator::new(self.store.clone(), DedupSettings::from(&config.dedup()));
        if let Some(embedder) = &self.embedder {
            dedup = dedup.with_embedder(embedder.clone());
        }
        if let Some(completer) = &self.completer {
            dedup = dedup.with_judge(completer.clone());
        }
        dedup
    }

    pub fn validator(&self, config: &LoreConfig) -> Result<ContentValidator> {
        let mut validator = ContentValidator::new(ValidationSettings::from(&config.validation()))?;
        if let Some(completer) = &self.completer {
            validator = validator.with_judge(completer.clone());
        }
        Ok(validator)
    }

    pub fn merger(&self, config: &LoreConfig) -> MergeStrategyManager {
        let mut merger =
            MergeStrategyManager::new(self.store.clone(), MergeSettings::from(&config.merge_config()));
        if let Some(embedder) = &self.embedder {
            merger = merger.with_embedder(embedder.clone());
        }
        if let Some(completer) = &self.completer {
            merger = merger.with_completer(completer.clone());
        }
        merger
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `--space` values.
pub fn parse_spaces(values: &[String]) -> Result<Vec<Space>> {
    values
        .iter()
        .map(|v| Space::from_str(v).map_err(anyhow::Error::from))
        .collect()
}

/// Print lifecycle results, as JSON or one line each.
pub fn print_operations(results: &[OperationResult], ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    let dim = Style::new().dim();
    if results.is_empty() {
        println!("{}", dim.apply_to("Nothing to do"));
    }
    for result in results {
        let mark = if result.success {
            style("ok").green()
        } else {
            style("failed").red()
        };
        let id = result.piece_id.as_deref().unwrap_or("-");
        print!("{} {} {}", mark, result.operation, id);
        if let Some(new_id) = &result.new_piece_id {
            print!(" -> {}", new_id);
        }
        if let (Some(old), Some(new)) = (result.old_version, result.new_version) {
            print!(" {}", dim.apply_to(format!("(v{} -> v{})", old, new)));
        }
        if let Some(message) = result.message.as_deref().or(result.error.as_deref()) {
            print!(" {}", dim.apply_to(message));
        }
        println!();
    }
    Ok(())
}

pub fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
        assert_eq!(truncate("a\nb", 10), "a b");
    }

    #[test]
    fn test_parse_spaces() {
        let spaces = parse_spaces(&["main".to_string(), "developmental".to_string()]).unwrap();
        assert_eq!(spaces, vec![Space::Main, Space::Developmental]);
        assert!(parse_spaces(&["attic".to_string()]).is_err());
    }
}
