//! Skill synthesis from clusters of related pieces.
//!
//! A new piece with enough close neighbors forms a cluster; the LLM decides
//! whether the cluster describes a reusable procedure and, if so, spells out
//! its steps. The result is a `procedure` piece routed to the `skills`
//! prompt section.

use lore_config::SkillsConfig;
use lore_llm::{SharedCompleter, SharedEmbedder, parse_json_response};
use lore_memory::{EntityScope, PieceFilter, SharedPieceStore};
use lore_types::{Id, KnowledgePiece, KnowledgeType, normalize_tags};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::nearest_neighbors;
use crate::embedding::{embed_text, ensure_embedding};
use crate::error::Result;

/// Info type of synthesized skills.
pub const SKILLS_INFO_TYPE: &str = "skills";

#[derive(Debug, Clone, PartialEq)]
pub struct SkillSettings {
    pub enabled: bool,
    /// Neighbors below this similarity are not part of the cluster.
    pub similarity_floor: f32,
    /// Cluster size including the new piece.
    pub min_cluster_size: usize,
    pub min_avg_similarity: f32,
    pub max_neighbors: usize,
}

impl Default for SkillSettings {
    fn default() -> Self {
        Self::from(&SkillsConfig::default())
    }
}

impl From<&SkillsConfig> for SkillSettings {
    fn from(config: &SkillsConfig) -> Self {
        Self {
            enabled: config.enabled,
            similarity_floor: config.similarity_floor,
            min_cluster_size: config.min_cluster_size.max(2),
            min_avg_similarity: config.min_avg_similarity,
            max_neighbors: config.max_neighbors.max(1),
        }
    }
}

pub struct SkillPrompt;

impl SkillPrompt {
    pub fn build(cluster: &[&KnowledgePiece]) -> String {
        let mut prompt = String::with_capacity(4096);
        prompt.push_str(SKILL_INSTRUCTION);
        prompt.push_str("\n\nRelated knowledge:\n\n");
        for (i, piece) in cluster.iter().enumerate() {
            prompt.push_str(&format!("{}. [{}] {}\n", i + 1, piece.knowledge_type, piece.content));
        }
        prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.\n");
        prompt
    }
}

const SKILL_INSTRUCTION: &str = r#"You decide whether a cluster of related knowledge describes a reusable skill: a procedure someone could follow step by step.

Return a JSON object:
```json
{"is_skill": true, "name": "...", "description": "...", "steps": ["...", "..."], "reasoning": "..."}
```

Rules:
- Set `is_skill` to false when the pieces are merely related facts
- `steps` are imperative and ordered
- Use only what the knowledge states; do not invent steps"#;

#[derive(Debug, Deserialize)]
struct SkillResponse {
    is_skill: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    steps: Vec<String>,
}

pub struct SkillSynthesizer {
    store: SharedPieceStore,
    embedder: Option<SharedEmbedder>,
    completer: Option<SharedCompleter>,
    settings: SkillSettings,
}

impl SkillSynthesizer {
    pub fn new(store: SharedPieceStore, settings: SkillSettings) -> Self {
        Self {
            store,
            embedder: None,
            completer: None,
            settings,
        }
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_completer(mut self, completer: SharedCompleter) -> Self {
        self.completer = Some(completer);
        self
    }

    /// A skill piece for the cluster around `piece`, if it forms one.
    ///
    /// Without a completer nothing is synthesized.
    pub async fn synthesize(&self, piece: &KnowledgePiece) -> Result<Option<KnowledgePiece>> {
        if !self.settings.enabled {
            return Ok(None);
        }
        let Some(completer) = &self.completer else {
            debug!("No completer configured, skipping skill synthesis");
            return Ok(None);
        };
        let embedding = match &piece.embedding {
            Some(v) => Some(v.clone()),
            None => embed_text(self.embedder.as_ref(), piece.text_for_embedding()).await,
        };
        let Some(embedding) = embedding else {
            return Ok(None);
        };

        let filter = PieceFilter::new().with_scope(EntityScope::from_entity(piece.entity_id.as_deref()));
        let neighbors: Vec<(KnowledgePiece, f32)> = nearest_neighbors(
            self.store.as_ref(),
            &embedding,
            filter,
            self.settings.max_neighbors,
            Some(&piece.piece_id),
        )?
        .into_iter()
        .filter(|(p, sim)| *sim >= self.settings.similarity_floor && p.info_type != SKILLS_INFO_TYPE)
        .collect();

        let cluster_size = neighbors.len() + 1;
        let avg = if neighbors.is_empty() {
            0.0
        } else {
            neighbors.iter().map(|(_, s)| s).sum::<f32>() / neighbors.len() as f32
        };
        if cluster_size < self.settings.min_cluster_size || avg < self.settings.min_avg_similarity {
            debug!(piece_id = %piece.piece_id, cluster_size, avg, "Cluster too small or loose for a skill");
            return Ok(None);
        }

        let mut cluster: Vec<&KnowledgePiece> = vec![piece];
        cluster.extend(neighbors.iter().map(|(p, _)| p));

        let raw = match completer.complete(&SkillPrompt::build(&cluster)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(piece_id = %piece.piece_id, error = %e, "Skill evaluation failed");
                return Ok(None);
            }
        };
        let response: SkillResponse = match parse_json_response(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(piece_id = %piece.piece_id, error = %e, "Skill evaluation response malformed");
                return Ok(None);
            }
        };
        let steps: Vec<&str> = response
            .steps
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !response.is_skill || steps.is_empty() || response.name.trim().is_empty() {
            debug!(piece_id = %piece.piece_id, "Cluster is not a skill");
            return Ok(None);
        }

        let mut content = format!("{}\n\n", response.name.trim());
        if !response.description.trim().is_empty() {
            content.push_str(response.description.trim());
            content.push_str("\n\n");
        }
        for (i, step) in steps.iter().enumerate() {
            content.push_str(&format!("{}. {}\n", i + 1, step));
        }

        let mut skill = KnowledgePiece::new(content.trim_end(), KnowledgeType::Procedure)
            .with_info_type(SKILLS_INFO_TYPE)
            .with_tags(normalize_tags(cluster.iter().flat_map(|p| p.tags.iter())))
            .with_summary(response.name.trim());
        skill.entity_id = piece.entity_id.clone();
        skill.domain = piece.domain.clone();
        skill.set_spaces(piece.spaces.clone());

        info!(source = %piece.piece_id, cluster_size, skill = %response.name.trim(), "Synthesized skill");
        Ok(Some(skill))
    }

    /// Synthesize and store. Returns the new skill's id.
    pub async fn synthesize_and_store(&self, piece: &KnowledgePiece) -> Result<Option<Id>> {
        let Some(mut skill) = self.synthesize(piece).await? else {
            return Ok(None);
        };
        ensure_embedding(self.embedder.as_ref(), &mut skill).await;
        Ok(Some(self.store.add(&skill)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lore_llm::MockCompleter;
    use lore_memory::{InMemoryPieceStore, KnowledgePieceStore};

    const SKILL_JSON: &str = r#"{"is_skill": true, "name": "Cut a release", "description": "Ship a tagged build.", "steps": ["bump the version", "tag the commit", "run cargo dist"]}"#;

    fn cluster_store() -> Arc<InMemoryPieceStore> {
        let store = Arc::new(InMemoryPieceStore::new());
        for (id, v) in [("r1", vec![0.95, 0.31]), ("r2", vec![0.9, 0.44]), ("far", vec![0.0, 1.0])] {
            store
                .add(
                    &KnowledgePiece::new(format!("release step {id}"), KnowledgeType::Note)
                        .with_id(id)
                        .with_tags(["release"])
                        .with_embedding(v),
                )
                .unwrap();
        }
        store
    }

    fn new_piece() -> KnowledgePiece {
        KnowledgePiece::new("tag before running cargo dist", KnowledgeType::Instruction)
            .with_id("new")
            .with_tags(["ci"])
            .with_embedding(vec![1.0, 0.0])
    }

    #[tokio::test]
    async fn test_synthesizes_procedure() {
        let store = cluster_store();
        let completer = Arc::new(MockCompleter::with_text(SKILL_JSON));
        let synth = SkillSynthesizer::new(store.clone(), SkillSettings::default())
            .with_completer(completer.clone());

        let id = synth.synthesize_and_store(&new_piece()).await.unwrap().unwrap();
        let skill = store.get(&id).unwrap().unwrap();
        assert_eq!(skill.knowledge_type, KnowledgeType::Procedure);
        assert_eq!(skill.info_type, SKILLS_INFO_TYPE);
        assert_eq!(skill.tags, vec!["ci", "release"]);
        assert!(skill.content.contains("2. tag the commit"));
        assert!(!completer.prompts()[0].contains("release step far"));
    }

    #[tokio::test]
    async fn test_no_completer_or_small_cluster() {
        let synth = SkillSynthesizer::new(cluster_store(), SkillSettings::default());
        assert!(synth.synthesize(&new_piece()).await.unwrap().is_none());

        let completer = Arc::new(MockCompleter::with_text(SKILL_JSON));
        let strict = SkillSettings {
            min_cluster_size: 5,
            ..SkillSettings::default()
        };
        let synth = SkillSynthesizer::new(cluster_store(), strict).with_completer(completer.clone());
        assert!(synth.synthesize(&new_piece()).await.unwrap().is_none());
        assert_eq!(completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_not_a_skill() {
        let synth = SkillSynthesizer::new(cluster_store(), SkillSettings::default())
            .with_completer(Arc::new(MockCompleter::with_text(r#"{"is_skill": false}"#)));
        assert!(synth.synthesize(&new_piece()).await.unwrap().is_none());
    }
}
