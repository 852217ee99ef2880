//! Token-budgeted prompt sections built from a retrieval result.
//!
//! Pieces are routed by `info_type` into named sections. Each section
//! enforces its own budget first; the overall ceiling is applied after, in
//! section order. An entry that would overflow is replaced by the piece's
//! summary when one exists, otherwise dropped.

use std::collections::{BTreeMap, HashSet};

use lore_config::ProviderConfig;
use lore_types::{EntityMetadata, ScoredPiece, Space};
use tracing::debug;

use crate::error::Result;
use crate::kb::{KnowledgeBase, RetrievalRequest, RetrievalResult};

/// Rough token estimate: four characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

pub const SKILLS: &str = "skills";
pub const INSTRUCTIONS: &str = "instructions";
pub const CONTEXT: &str = "context";
pub const EPISODIC: &str = "episodic";
pub const USER_PROFILE: &str = "user_profile";

/// Render and ceiling order.
pub const SECTION_ORDER: [&str; 5] = [USER_PROFILE, INSTRUCTIONS, SKILLS, CONTEXT, EPISODIC];

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// One rendered section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSection {
    pub name: String,
    pub entries: Vec<String>,
    /// Estimated tokens of the kept entries.
    pub tokens: usize,
    /// Entries rendered from a summary instead of full content.
    pub summarized: usize,
    /// Entries that did not fit at all.
    pub dropped: usize,
}

impl PromptSection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All non-empty sections in render order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext {
    pub sections: Vec<PromptSection>,
}

impl PromptContext {
    pub fn section(&self, name: &str) -> Option<&PromptSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn total_tokens(&self) -> usize {
        self.sections.iter().map(|s| s.tokens).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(PromptSection::is_empty)
    }

    pub fn render(&self) -> String {
        let mut blocks = Vec::new();
        for section in self.sections.iter().filter(|s| !s.is_empty()) {
            let mut block = format!("## {}\n", section_title(&section.name));
            for entry in &section.entries {
                block.push_str("- ");
                block.push_str(entry);
                block.push('\n');
            }
            blocks.push(block.trim_end().to_string());
        }
        blocks.join("\n\n")
    }
}

fn section_title(name: &str) -> String {
    let mut title = String::with_capacity(name.len());
    for (i, word) in name.split('_').enumerate() {
        if i > 0 {
            title.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            title.extend(first.to_uppercase());
            title.push_str(chars.as_str());
        }
    }
    title
}

/// A candidate line with its optional short form.
#[derive(Debug, Clone)]
struct Entry {
    full: String,
    summary: Option<String>,
}

impl Entry {
    /// The longest form that fits in `remaining`, if any.
    fn fit(&self, remaining: usize) -> Option<(String, bool)> {
        if estimate_tokens(&self.full) <= remaining {
            return Some((self.full.clone(), false));
        }
        self.summary
            .as_ref()
            .filter(|s| estimate_tokens(s) <= remaining)
            .map(|s| (s.clone(), true))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Per-section and overall token budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub section_budgets: BTreeMap<String, usize>,
    pub total_budget: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for ProviderSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            section_budgets: config.section_budgets.clone(),
            total_budget: config.total_budget,
        }
    }
}

/// Builds [`PromptContext`]s from retrieval results.
#[derive(Debug, Clone, Default)]
pub struct ContextProvider {
    settings: ProviderSettings,
}

impl ContextProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Section a piece's `info_type` routes to. Unknown types go to `context`.
    pub fn section_for(&self, info_type: &str) -> &'static str {
        SECTION_ORDER
            .iter()
            .copied()
            .find(|s| *s == info_type && *s != USER_PROFILE)
            .unwrap_or(CONTEXT)
    }

    /// Retrieve for `query` and build the budgeted sections.
    pub async fn provide(
        &self,
        kb: &KnowledgeBase,
        query: &str,
        entity_id: Option<&str>,
        spaces: &[Space],
    ) -> Result<PromptContext> {
        let mut request = RetrievalRequest::new(query).with_spaces(spaces.to_vec());
        if let Some(id) = entity_id {
            request = request.for_entity(id);
        }
        let result = kb.retrieve(&request).await?;
        Ok(self.build(&result))
    }

    pub fn build(&self, result: &RetrievalResult) -> PromptContext {
        let mut routed: BTreeMap<&'static str, Vec<Entry>> = BTreeMap::new();

        for meta in result.metadata.iter().chain(result.global_metadata.iter()) {
            routed
                .entry(USER_PROFILE)
                .or_default()
                .extend(profile_entries(meta));
        }

        let mut seen = HashSet::new();
        for r in result.pieces.iter().chain(result.graph_context.pieces.iter()) {
            if !seen.insert(r.id().to_string()) {
                continue;
            }
            routed
                .entry(self.section_for(&r.piece.info_type))
                .or_default()
                .push(piece_entry(r));
        }

        let mut total_remaining = self.settings.total_budget;
        let mut sections = Vec::new();
        for name in SECTION_ORDER {
            let Some(entries) = routed.remove(name) else {
                continue;
            };
            let mut section = PromptSection::new(name);
            let mut remaining = self
                .settings
                .section_budgets
                .get(name)
                .copied()
                .unwrap_or(self.settings.total_budget)
                .min(total_remaining);

            for entry in &entries {
                match entry.fit(remaining) {
                    Some((text, summarized)) => {
                        let tokens = estimate_tokens(&text);
                        remaining -= tokens;
                        total_remaining -= tokens;
                        section.tokens += tokens;
                        section.summarized += usize::from(summarized);
                        section.entries.push(text);
                    }
                    None => section.dropped += 1,
                }
            }

            if section.dropped > 0 || section.summarized > 0 {
                debug!(
                    section = name,
                    kept = section.entries.len(),
                    summarized = section.summarized,
                    dropped = section.dropped,
                    "Section budget applied"
                );
            }
            if !section.is_empty() {
                sections.push(section);
            }
        }

        PromptContext { sections }
    }
}

fn piece_entry(r: &ScoredPiece) -> Entry {
    Entry {
        full: r.piece.content.clone(),
        summary: r.piece.summary.clone().filter(|s| !s.trim().is_empty()),
    }
}

fn profile_entries(meta: &EntityMetadata) -> Vec<Entry> {
    meta.properties
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Entry {
                full: format!("{}: {}", key, value),
                summary: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::{GraphContext, SearchStrategy};
    use lore_types::{KnowledgePiece, KnowledgeType};

    fn scored(id: &str, content: &str, info_type: &str) -> ScoredPiece {
        ScoredPiece::new(
            KnowledgePiece::new(content, KnowledgeType::Note)
                .with_id(id)
                .with_info_type(info_type),
            1.0,
        )
    }

    fn result(pieces: Vec<ScoredPiece>) -> RetrievalResult {
        RetrievalResult {
            metadata: None,
            global_metadata: None,
            pieces,
            graph_context: GraphContext::default(),
            strategy: SearchStrategy::Plain,
        }
    }

    fn budgets(pairs: &[(&str, usize)], total: usize) -> ContextProvider {
        ContextProvider::new(ProviderSettings {
            section_budgets: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            total_budget: total,
        })
    }

    #[test]
    fn test_routes_by_info_type() {
        let provider = ContextProvider::default();
        let ctx = provider.build(&result(vec![
            scored("a", "run cargo fmt", "instructions"),
            scored("b", "how to bisect", "skills"),
            scored("c", "some fact", "mystery"),
            scored("d", "yesterday we shipped", "episodic"),
        ]));

        assert_eq!(ctx.section(INSTRUCTIONS).unwrap().entries, vec!["run cargo fmt"]);
        assert_eq!(ctx.section(SKILLS).unwrap().entries, vec!["how to bisect"]);
        assert_eq!(ctx.section(CONTEXT).unwrap().entries, vec!["some fact"]);
        assert_eq!(ctx.section(EPISODIC).unwrap().entries, vec!["yesterday we shipped"]);
        let names: Vec<&str> = ctx.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![INSTRUCTIONS, SKILLS, CONTEXT, EPISODIC]);
    }

    #[test]
    fn test_section_budget_uses_summary_then_drops() {
        let long = "x".repeat(400); // 100 tokens
        let mut with_summary = scored("a", &long, "context");
        with_summary.piece.summary = Some("short form".into());
        let provider = budgets(&[("context", 10)], 100);

        let ctx = provider.build(&result(vec![with_summary, scored("b", &long, "context")]));
        let section = ctx.section(CONTEXT).unwrap();
        assert_eq!(section.entries, vec!["short form"]);
        assert_eq!(section.summarized, 1);
        assert_eq!(section.dropped, 1);
    }

    #[test]
    fn test_total_ceiling_applies_across_sections() {
        let provider = budgets(&[("instructions", 10), ("context", 10)], 12);
        let eight_tokens = "y".repeat(32);
        let ctx = provider.build(&result(vec![
            scored("a", &eight_tokens, "instructions"),
            scored("b", &eight_tokens, "context"),
        ]));
        assert_eq!(ctx.section(INSTRUCTIONS).unwrap().entries.len(), 1);
        assert!(ctx.section(CONTEXT).is_none());
        assert!(ctx.total_tokens() <= 12);
    }

    #[test]
    fn test_metadata_goes_to_user_profile() {
        let mut r = result(vec![scored("a", "user_profile piece", "user_profile")]);
        r.metadata = Some(EntityMetadata::new("user-1", "person").with_property("name", "Sam"));
        let ctx = ContextProvider::default().build(&r);

        assert_eq!(ctx.section(USER_PROFILE).unwrap().entries, vec!["name: Sam"]);
        // pieces never route into the profile section
        assert_eq!(ctx.section(CONTEXT).unwrap().entries, vec!["user_profile piece"]);
        assert!(ctx.render().starts_with("## User Profile\n- name: Sam"));
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
