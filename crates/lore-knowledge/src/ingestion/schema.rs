//! The ingestion payload: metadata, pieces and graph for one document.
//!
//! ```json
//! {
//!   "metadata": {"user-1": {"entity_type": "user", "properties": {...}}},
//!   "pieces": [{"id": "...", "content": "...", "knowledge_type": "fact", "info_type": "context"}],
//!   "graph": {"nodes": [{"node_id": "...", "node_type": "..."}],
//!             "edges": [{"source_id": "...", "target_id": "...", "edge_type": "...",
//!                        "properties": {"piece_id": "..."}}]}
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use lore_llm::{extract_json_object, strip_code_fences};
use lore_memory::{GraphEdge, GraphNode};
use lore_types::{
    EntityMetadata, KnowledgePiece, KnowledgeType, MergeStrategy, Space, SuggestionStatus,
    ValidationStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KnowledgeError, Result};

fn default_entity_type() -> String {
    "entity".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl MetadataEntry {
    pub fn to_metadata(&self, entity_id: &str) -> EntityMetadata {
        let mut metadata = EntityMetadata::new(entity_id, self.entity_type.clone());
        metadata.properties = self.properties.clone();
        metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSection {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionDocument {
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataEntry>,
    #[serde(default)]
    pub pieces: Vec<KnowledgePiece>,
    #[serde(default)]
    pub graph: GraphSection,
}

impl IngestionDocument {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
            && self.pieces.is_empty()
            && self.graph.nodes.is_empty()
            && self.graph.edges.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse and validate a payload, tolerating code fences and surrounding prose.
///
/// Unparseable JSON is a [`KnowledgeError::Parse`]; missing required fields
/// and unknown enum values are collected into one [`KnowledgeError::Schema`].
pub fn parse_document(raw: &str) -> Result<IngestionDocument> {
    let cleaned = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first) => extract_json_object(cleaned)
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| KnowledgeError::Parse(format!("payload is not JSON: {}", first)))?,
    };
    document_from_value(value)
}

/// Validate an already-decoded payload.
pub fn document_from_value(mut value: Value) -> Result<IngestionDocument> {
    let errors = validate_and_canonicalize(&mut value);
    if !errors.is_empty() {
        return Err(KnowledgeError::Schema(errors));
    }
    let mut document: IngestionDocument =
        serde_json::from_value(value).map_err(|e| KnowledgeError::Schema(vec![e.to_string()]))?;
    for piece in &mut document.pieces {
        piece.normalize();
    }
    Ok(document)
}

const PIECE_ENUM_FIELDS: &[&str] = &["space", "merge_strategy", "validation_status", "suggestion_status"];

/// Check required fields and rewrite enum values to their canonical form.
fn validate_and_canonicalize(value: &mut Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = value.as_object_mut() else {
        return vec!["payload is not a JSON object".to_string()];
    };

    if let Some(pieces) = root.get_mut("pieces") {
        match pieces.as_array_mut() {
            Some(pieces) => {
                for (i, piece) in pieces.iter_mut().enumerate() {
                    validate_piece(i, piece, &mut errors);
                }
            }
            None => errors.push("'pieces' must be an array".to_string()),
        }
    }

    if let Some(graph) = root.get("graph") {
        validate_graph(graph, &mut errors);
    }

    if let Some(metadata) = root.get("metadata")
        && !metadata.is_object()
    {
        errors.push("'metadata' must be an object keyed by entity id".to_string());
    }
    errors
}

fn validate_piece(i: usize, piece: &mut Value, errors: &mut Vec<String>) {
    let Some(obj) = piece.as_object_mut() else {
        errors.push(format!("pieces[{}]: not an object", i));
        return;
    };

    let has_text = |v: Option<&Value>| v.and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty());
    if !has_text(obj.get("id")) && !has_text(obj.get("piece_id")) {
        errors.push(format!("pieces[{}]: missing required field 'id'", i));
    }
    for field in ["content", "knowledge_type", "info_type"] {
        if !has_text(obj.get(field)) {
            errors.push(format!("pieces[{}]: missing required field '{}'", i, field));
        }
    }

    if let Some(Value::String(kt)) = obj.get_mut("knowledge_type")
        && !kt.trim().is_empty()
    {
        canonicalize::<KnowledgeType>(i, kt, errors);
    }
    for field in PIECE_ENUM_FIELDS {
        match obj.get_mut(*field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => match *field {
                "space" => canonicalize::<Space>(i, s, errors),
                "merge_strategy" => canonicalize::<MergeStrategy>(i, s, errors),
                "validation_status" => canonicalize::<ValidationStatus>(i, s, errors),
                _ => canonicalize::<SuggestionStatus>(i, s, errors),
            },
            Some(_) => errors.push(format!("pieces[{}]: '{}' must be a string", i, field)),
        }
    }
    if let Some(spaces) = obj.get_mut("spaces") {
        match spaces.as_array_mut() {
            Some(spaces) => {
                for s in spaces.iter_mut() {
                    match s {
                        Value::String(s) => canonicalize::<Space>(i, s, errors),
                        _ => errors.push(format!("pieces[{}]: 'spaces' entries must be strings", i)),
                    }
                }
            }
            None => errors.push(format!("pieces[{}]: 'spaces' must be an array", i)),
        }
    }
}

/// Replace `value` with the canonical spelling of the enum it names.
fn canonicalize<E>(i: usize, value: &mut String, errors: &mut Vec<String>)
where
    E: FromStr<Err = lore_types::TypesError> + std::fmt::Display,
{
    match value.parse::<E>() {
        Ok(parsed) => *value = parsed.to_string(),
        Err(e) => errors.push(format!("pieces[{}]: {}", i, e)),
    }
}

fn validate_graph(graph: &Value, errors: &mut Vec<String>) {
    let Some(graph) = graph.as_object() else {
        errors.push("'graph' must be an object".to_string());
        return;
    };
    let has_text = |obj: &serde_json::Map<String, Value>, field: &str| {
        obj.get(field).and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty())
    };

    if let Some(nodes) = graph.get("nodes").and_then(Value::as_array) {
        for (i, node) in nodes.iter().enumerate() {
            match node.as_object() {
                Some(obj) if has_text(obj, "node_id") => {}
                Some(_) => errors.push(format!("graph.nodes[{}]: missing required field 'node_id'", i)),
                None => errors.push(format!("graph.nodes[{}]: not an object", i)),
            }
        }
    }
    if let Some(edges) = graph.get("edges").and_then(Value::as_array) {
        for (i, edge) in edges.iter().enumerate() {
            let Some(obj) = edge.as_object() else {
                errors.push(format!("graph.edges[{}]: not an object", i));
                continue;
            };
            for field in ["source_id", "target_id", "edge_type"] {
                if !has_text(obj, field) {
                    errors.push(format!("graph.edges[{}]: missing required field '{}'", i, field));
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merging
// ─────────────────────────────────────────────────────────────────────────────

/// Combine per-chunk payloads into one, in chunk order.
///
/// Pieces and nodes are keyed by id and edges by `(source, target, type)`;
/// the first occurrence wins. Node and metadata properties are unioned, with
/// earlier values kept on conflict.
pub fn merge_documents<I>(documents: I) -> IngestionDocument
where
    I: IntoIterator<Item = IngestionDocument>,
{
    let mut merged = IngestionDocument::default();
    let mut piece_ids: HashSet<String> = HashSet::new();
    let mut node_index: HashMap<String, usize> = HashMap::new();
    let mut edge_keys: HashSet<(String, String, String)> = HashSet::new();

    for document in documents {
        for (entity_id, entry) in document.metadata {
            match merged.metadata.get_mut(&entity_id) {
                Some(existing) => {
                    for (k, v) in entry.properties {
                        existing.properties.entry(k).or_insert(v);
                    }
                }
                None => {
                    merged.metadata.insert(entity_id, entry);
                }
            }
        }

        for piece in document.pieces {
            if piece_ids.insert(piece.piece_id.clone()) {
                merged.pieces.push(piece);
            }
        }

        for node in document.graph.nodes {
            match node_index.get(&node.node_id) {
                Some(&i) => {
                    let existing = &mut merged.graph.nodes[i];
                    if existing.label.is_none() {
                        existing.label = node.label;
                    }
                    for (k, v) in node.properties {
                        existing.properties.entry(k).or_insert(v);
                    }
                }
                None => {
                    node_index.insert(node.node_id.clone(), merged.graph.nodes.len());
                    merged.graph.nodes.push(node);
                }
            }
        }

        for edge in document.graph.edges {
            let key = (edge.source_id.clone(), edge.target_id.clone(), edge.edge_type.clone());
            if edge_keys.insert(key) {
                merged.graph.edges.push(edge);
            }
        }
    }
    merged
}
