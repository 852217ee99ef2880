//! The knowledge piece: an unstructured text chunk plus its metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::enums::{KnowledgeType, MergeStrategy, Space, SuggestionStatus, ValidationStatus};
use crate::error::{Result, TypesError};
use crate::{Id, Timestamp, new_id, now};

/// Default prompt section for pieces that do not name one.
pub const DEFAULT_INFO_TYPE: &str = "context";

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex digest of the whitespace-normalized content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase and trim tags, dropping empties and duplicates. Output is sorted.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn default_info_type() -> String {
    DEFAULT_INFO_TYPE.to_string()
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_spaces() -> Vec<Space> {
    vec![Space::Main]
}

/// A unit of unstructured knowledge with classification metadata.
///
/// `content_hash` and `tags` are kept normalized by every constructor and
/// mutator on this type. Pieces deserialized from external input should be
/// passed through [`KnowledgePiece::normalize`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePiece {
    #[serde(alias = "id", default)]
    pub piece_id: Id,
    pub content: String,
    pub knowledge_type: KnowledgeType,
    #[serde(default = "default_info_type")]
    pub info_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Id>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,

    #[serde(default)]
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_text: Option<String>,

    /// Primary lifecycle scope. Always equal to `spaces[0]`.
    #[serde(default)]
    pub space: Space,
    /// Every space this piece belongs to, primary first.
    #[serde(default)]
    pub spaces: Vec<Space>,

    // Version chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Id>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,

    // Merge workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(default)]
    pub merge_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_merge_suggestion: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_suggestion_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion_status: Option<SuggestionStatus>,

    // Validation
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_issues: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default = "now")]
    pub created_at: Timestamp,
    #[serde(default = "now")]
    pub updated_at: Timestamp,
}

impl KnowledgePiece {
    /// Create a new active piece in the main space.
    pub fn new(content: impl Into<String>, knowledge_type: KnowledgeType) -> Self {
        let content = content.into();
        let ts = now();
        Self {
            piece_id: new_id(),
            content_hash: content_hash(&content),
            content,
            knowledge_type,
            info_type: default_info_type(),
            tags: Vec::new(),
            entity_id: None,
            domain: None,
            secondary_domains: Vec::new(),
            custom_tags: BTreeMap::new(),
            embedding: None,
            embedding_text: None,
            space: Space::Main,
            spaces: default_spaces(),
            supersedes: None,
            version: 1,
            is_active: true,
            merge_strategy: None,
            merge_processed: false,
            pending_merge_suggestion: None,
            merge_suggestion_reason: None,
            suggestion_status: None,
            validation_status: ValidationStatus::Pending,
            validation_issues: Vec::new(),
            summary: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.piece_id = id.into();
        self
    }

    pub fn with_info_type(mut self, info_type: impl Into<String>) -> Self {
        self.info_type = info_type.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<Id>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_secondary_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_space(mut self, space: Space) -> Self {
        self.set_spaces(vec![space]);
        self
    }

    pub fn with_spaces(mut self, spaces: Vec<Space>) -> Self {
        self.set_spaces(spaces);
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_updated_at(mut self, ts: Timestamp) -> Self {
        self.updated_at = ts;
        self
    }

    /// Replace the content, recomputing the hash and dropping a stale embedding.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = content_hash(&self.content);
        self.embedding = None;
        self.touch();
    }

    /// Replace the space membership. The first entry becomes the primary space.
    ///
    /// An empty list resets membership to the main space.
    pub fn set_spaces(&mut self, spaces: Vec<Space>) {
        let mut deduped: Vec<Space> = Vec::with_capacity(spaces.len());
        for s in spaces {
            if !deduped.contains(&s) {
                deduped.push(s);
            }
        }
        if deduped.is_empty() {
            deduped.push(Space::Main);
        }
        self.space = deduped[0];
        self.spaces = deduped;
    }

    /// Move the piece into a new primary space, keeping other memberships.
    pub fn move_to_space(&mut self, space: Space) {
        let mut spaces = vec![space];
        spaces.extend(self.spaces.iter().copied().filter(|s| *s != space));
        self.set_spaces(spaces);
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = now();
    }

    /// Text used to compute the embedding.
    pub fn text_for_embedding(&self) -> &str {
        self.embedding_text.as_deref().unwrap_or(&self.content)
    }

    /// Whether the piece belongs to at least one of `spaces`.
    ///
    /// An empty filter matches every piece.
    pub fn in_any_space(&self, spaces: &[Space]) -> bool {
        if spaces.is_empty() {
            return true;
        }
        if self.spaces.is_empty() {
            return spaces.contains(&self.space);
        }
        self.spaces.iter().any(|s| spaces.contains(s))
    }

    /// Whether the piece is global (not owned by an entity).
    pub fn is_global(&self) -> bool {
        self.entity_id.is_none()
    }

    /// Re-establish derived invariants after deserialization.
    ///
    /// Generates an id if missing, recomputes the content hash, normalizes
    /// tags and reconciles `space` with `spaces`.
    pub fn normalize(&mut self) {
        if self.piece_id.trim().is_empty() {
            self.piece_id = new_id();
        }
        self.content_hash = content_hash(&self.content);
        self.tags = normalize_tags(&self.tags);
        // spaces[0] wins when both are present and disagree
        let spaces = if self.spaces.is_empty() {
            vec![self.space]
        } else {
            std::mem::take(&mut self.spaces)
        };
        self.set_spaces(spaces);
        if self.version == 0 {
            self.version = 1;
        }
    }

    /// Check the piece is storable.
    pub fn validate(&self) -> Result<()> {
        if self.piece_id.trim().is_empty() {
            return Err(TypesError::MissingField("piece_id".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(TypesError::EmptyContent);
        }
        if self.info_type.trim().is_empty() {
            return Err(TypesError::MissingField("info_type".to_string()));
        }
        Ok(())
    }

    /// Build the next version of this piece carrying `content`.
    ///
    /// The result has a fresh id, `supersedes` pointing at this piece,
    /// `version + 1` and no embedding. This piece is left untouched; callers
    /// retire it only after the new version is stored.
    pub fn superseding(&self, content: impl Into<String>) -> KnowledgePiece {
        let mut next = self.clone();
        let ts = now();
        next.piece_id = new_id();
        next.supersedes = Some(self.piece_id.clone());
        next.version = self.version + 1;
        next.is_active = true;
        next.pending_merge_suggestion = None;
        next.merge_suggestion_reason = None;
        next.suggestion_status = None;
        next.created_at = ts;
        next.set_content(content);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_idempotent() {
        let a = content_hash("Rust uses ownership");
        let b = content_hash("Rust uses ownership");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_ignores_whitespace_differences() {
        let a = content_hash("Rust  uses\n\townership ");
        let b = content_hash("  Rust uses ownership");
        assert_eq!(a, b);
        assert_ne!(a, content_hash("Rust uses borrowing"));
    }

    #[test]
    fn test_tags_are_normalized() {
        let piece =
            KnowledgePiece::new("x", KnowledgeType::Fact).with_tags(["  Rust", "rust", "", "DB "]);
        assert_eq!(piece.tags, vec!["db".to_string(), "rust".to_string()]);
    }

    #[test]
    fn test_new_piece_defaults() {
        let piece = KnowledgePiece::new("hello", KnowledgeType::Note);
        assert!(piece.is_active);
        assert_eq!(piece.version, 1);
        assert_eq!(piece.info_type, "context");
        assert_eq!(piece.space, Space::Main);
        assert_eq!(piece.spaces, vec![Space::Main]);
        assert_eq!(piece.content_hash, content_hash("hello"));
        assert!(piece.is_global());
    }

    #[test]
    fn test_set_spaces_keeps_primary_first() {
        let piece = KnowledgePiece::new("x", KnowledgeType::Fact)
            .with_spaces(vec![Space::Personal, Space::Main, Space::Personal]);
        assert_eq!(piece.space, Space::Personal);
        assert_eq!(piece.spaces, vec![Space::Personal, Space::Main]);

        let mut moved = piece.clone();
        moved.move_to_space(Space::Developmental);
        assert_eq!(moved.space, Space::Developmental);
        assert_eq!(
            moved.spaces,
            vec![Space::Developmental, Space::Personal, Space::Main]
        );
    }

    #[test]
    fn test_in_any_space() {
        let piece = KnowledgePiece::new("x", KnowledgeType::Fact).with_space(Space::Personal);
        assert!(piece.in_any_space(&[]));
        assert!(piece.in_any_space(&[Space::Main, Space::Personal]));
        assert!(!piece.in_any_space(&[Space::Main]));
    }

    #[test]
    fn test_set_content_recomputes_hash() {
        let mut piece = KnowledgePiece::new("old", KnowledgeType::Fact).with_embedding(vec![1.0]);
        piece.set_content("new");
        assert_eq!(piece.content_hash, content_hash("new"));
        assert!(piece.embedding.is_none());
    }

    #[test]
    fn test_superseding_builds_next_version() {
        let old = KnowledgePiece::new("v1", KnowledgeType::Fact).with_tags(["a"]);
        let next = old.superseding("v2");
        assert_ne!(next.piece_id, old.piece_id);
        assert_eq!(next.supersedes.as_deref(), Some(old.piece_id.as_str()));
        assert_eq!(next.version, 2);
        assert!(next.is_active);
        assert_eq!(next.tags, old.tags);
        assert_eq!(next.content, "v2");
        assert!(old.is_active);
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let piece = KnowledgePiece::new("   ", KnowledgeType::Fact);
        assert_eq!(piece.validate(), Err(TypesError::EmptyContent));
    }

    #[test]
    fn test_deserialize_with_id_alias_and_normalize() {
        let json = r#"{
            "id": "p1",
            "content": "Use  tabs",
            "knowledge_type": "instruction",
            "info_type": "instructions",
            "tags": ["Style", "style"]
        }"#;
        let mut piece: KnowledgePiece = serde_json::from_str(json).unwrap();
        piece.normalize();
        assert_eq!(piece.piece_id, "p1");
        assert_eq!(piece.tags, vec!["style".to_string()]);
        assert_eq!(piece.content_hash, content_hash("Use tabs"));
        assert_eq!(piece.version, 1);
        assert!(piece.is_active);
        assert_eq!(piece.spaces, vec![Space::Main]);
    }

    #[test]
    fn test_normalize_takes_space_when_spaces_missing() {
        let json = r#"{"id": "p2", "content": "x", "knowledge_type": "fact", "space": "personal"}"#;
        let mut piece: KnowledgePiece = serde_json::from_str(json).unwrap();
        piece.normalize();
        assert_eq!(piece.space, Space::Personal);
        assert_eq!(piece.spaces, vec![Space::Personal]);
    }

    #[test]
    fn test_normalize_generates_missing_id() {
        let json = r#"{"content": "x", "knowledge_type": "fact"}"#;
        let mut piece: KnowledgePiece = serde_json::from_str(json).unwrap();
        assert!(piece.piece_id.is_empty());
        piece.normalize();
        assert!(!piece.piece_id.is_empty());
    }
}
