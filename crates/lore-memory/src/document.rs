//! Piece store over a generic document-retrieval service.
//!
//! Pieces are mapped onto `Document { id, namespace, content, metadata }`:
//! the content becomes the document body, the embedding is passed through,
//! and every other piece field is flattened into the metadata map. The
//! service knows nothing about spaces, so this adapter reports
//! `supports_space_filter() == false` and callers post-filter.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use lore_types::{Id, KnowledgePiece, ScoredPiece, sort_scored};

use crate::backend::{KnowledgePieceStore, PieceFilter, PieceQuery};
use crate::error::{MemoryError, Result};
use crate::scoring::{blend, keyword_score, vector_score};
use crate::validation::validate_piece_result;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "knowledge";

/// Extra candidates requested from the service per result, to survive post-filtering.
const OVERFETCH: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// Document Service
// ─────────────────────────────────────────────────────────────────────────────

/// A record in a document-retrieval service.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub namespace: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
    pub embedding: Option<Vec<f32>>,
}

/// Minimal surface of a document-retrieval service.
pub trait DocumentService: Send + Sync {
    fn upsert(&self, document: Document) -> Result<()>;

    fn get(&self, namespace: &str, id: &str) -> Result<Option<Document>>;

    fn delete(&self, namespace: &str, id: &str) -> Result<bool>;

    /// Top matches in a namespace with a relevance score in `[0, 1]`.
    fn search(
        &self,
        namespace: &str,
        text: &str,
        embedding: Option<&[f32]>,
        top_k: usize,
    ) -> Result<Vec<(Document, f32)>>;

    /// Every document in a namespace.
    fn list(&self, namespace: &str) -> Result<Vec<Document>>;
}

/// In-process [`DocumentService`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentService {
    documents: RwLock<BTreeMap<(String, String), Document>>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentService for InMemoryDocumentService {
    fn upsert(&self, document: Document) -> Result<()> {
        let key = (document.namespace.clone(), document.id.clone());
        self.documents.write().insert(key, document);
        Ok(())
    }

    fn get(&self, namespace: &str, id: &str) -> Result<Option<Document>> {
        let key = (namespace.to_string(), id.to_string());
        Ok(self.documents.read().get(&key).cloned())
    }

    fn delete(&self, namespace: &str, id: &str) -> Result<bool> {
        let key = (namespace.to_string(), id.to_string());
        Ok(self.documents.write().remove(&key).is_some())
    }

    fn search(
        &self,
        namespace: &str,
        text: &str,
        embedding: Option<&[f32]>,
        top_k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        let docs = self.documents.read();
        let has_text = !text.trim().is_empty();
        let mut scored: Vec<(Document, f32)> = docs
            .values()
            .filter(|d| d.namespace == namespace)
            .filter_map(|d| {
                let v = embedding.map(|q| d.embedding.as_deref().map_or(0.0, |e| vector_score(q, e)));
                let k = has_text.then(|| keyword_score(text, &d.content));
                let score = blend(0.5, v, k);
                (score > 0.0).then(|| (d.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn list(&self, namespace: &str) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|d| d.namespace == namespace)
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Piece Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Map a piece onto a document in `namespace`.
pub fn piece_to_document(piece: &KnowledgePiece, namespace: &str) -> Result<Document> {
    let mut record = piece.clone();
    let embedding = record.embedding.take();

    let Value::Object(fields) = serde_json::to_value(&record)? else {
        return Err(MemoryError::InvalidData(
            "piece did not serialize to an object".to_string(),
        ));
    };
    let metadata: BTreeMap<String, Value> = fields
        .into_iter()
        .filter(|(k, _)| k != "content" && k != "piece_id")
        .collect();

    Ok(Document {
        id: piece.piece_id.clone(),
        namespace: namespace.to_string(),
        content: piece.content.clone(),
        metadata,
        embedding,
    })
}

/// Rebuild a piece from a document written by [`piece_to_document`].
pub fn document_to_piece(document: Document) -> Result<KnowledgePiece> {
    let mut fields: serde_json::Map<String, Value> = document.metadata.into_iter().collect();
    fields.insert("piece_id".to_string(), Value::String(document.id));
    fields.insert("content".to_string(), Value::String(document.content));

    let mut piece: KnowledgePiece = serde_json::from_value(Value::Object(fields))?;
    piece.embedding = document.embedding;
    Ok(piece)
}

// ─────────────────────────────────────────────────────────────────────────────
// Document Piece Store
// ─────────────────────────────────────────────────────────────────────────────

/// [`KnowledgePieceStore`] backed by a [`DocumentService`].
pub struct DocumentPieceStore {
    service: Arc<dyn DocumentService>,
    namespace: String,
}

impl std::fmt::Debug for DocumentPieceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPieceStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl DocumentPieceStore {
    pub fn new(service: Arc<dyn DocumentService>) -> Self {
        Self {
            service,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl KnowledgePieceStore for DocumentPieceStore {
    fn add(&self, piece: &KnowledgePiece) -> Result<Id> {
        validate_piece_result(piece, None)?;
        if self.service.get(&self.namespace, &piece.piece_id)?.is_some() {
            return Err(MemoryError::Duplicate(piece.piece_id.clone()));
        }
        self.service.upsert(piece_to_document(piece, &self.namespace)?)?;
        debug!(piece_id = %piece.piece_id, namespace = %self.namespace, "Stored piece document");
        Ok(piece.piece_id.clone())
    }

    fn get(&self, piece_id: &str) -> Result<Option<KnowledgePiece>> {
        self.service
            .get(&self.namespace, piece_id)?
            .map(document_to_piece)
            .transpose()
    }

    fn update(&self, piece: &KnowledgePiece) -> Result<bool> {
        validate_piece_result(piece, None)?;
        if self.service.get(&self.namespace, &piece.piece_id)?.is_none() {
            return Ok(false);
        }
        self.service.upsert(piece_to_document(piece, &self.namespace)?)?;
        Ok(true)
    }

    fn remove(&self, piece_id: &str) -> Result<bool> {
        self.service.delete(&self.namespace, piece_id)
    }

    /// Over-fetches from the service, then applies every filter except spaces.
    fn search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let fetch = query.top_k.saturating_mul(OVERFETCH).max(query.top_k);
        let hits = self.service.search(
            &self.namespace,
            &query.text,
            query.embedding.as_deref(),
            fetch,
        )?;

        let mut results = Vec::with_capacity(hits.len());
        for (document, score) in hits {
            let piece = document_to_piece(document)?;
            if query.filter.matches_except_spaces(&piece) {
                results.push(ScoredPiece::new(piece, score.clamp(0.0, 1.0)));
            }
        }
        sort_scored(&mut results);
        results.truncate(query.top_k);
        Ok(results)
    }

    fn list_all(&self, filter: &PieceFilter) -> Result<Vec<KnowledgePiece>> {
        let mut pieces = Vec::new();
        for document in self.service.list(&self.namespace)? {
            let piece = document_to_piece(document)?;
            if filter.matches(&piece) {
                pieces.push(piece);
            }
        }
        pieces.sort_by(|a, b| a.piece_id.cmp(&b.piece_id));
        Ok(pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_types::{KnowledgeType, Space};

    fn store() -> DocumentPieceStore {
        DocumentPieceStore::new(Arc::new(InMemoryDocumentService::new()))
    }

    #[test]
    fn test_piece_document_mapping_roundtrip() {
        let piece = KnowledgePiece::new("Prefers dark mode", KnowledgeType::Preference)
            .with_id("p1")
            .with_tags(["ui"])
            .with_entity("user-1")
            .with_embedding(vec![0.1, 0.2])
            .with_space(Space::Personal);

        let doc = piece_to_document(&piece, "ns").unwrap();
        assert_eq!(doc.id, "p1");
        assert_eq!(doc.namespace, "ns");
        assert_eq!(doc.content, "Prefers dark mode");
        assert_eq!(doc.metadata["entity_id"], "user-1");
        assert!(!doc.metadata.contains_key("content"));
        assert!(!doc.metadata.contains_key("embedding"));

        assert_eq!(document_to_piece(doc).unwrap(), piece);
    }

    #[test]
    fn test_crud_through_service() {
        let store = store();
        let piece = KnowledgePiece::new("one", KnowledgeType::Fact).with_id("p1");
        store.add(&piece).unwrap();
        assert!(matches!(store.add(&piece), Err(MemoryError::Duplicate(_))));

        let mut changed = piece.clone();
        changed.set_content("two");
        assert!(store.update(&changed).unwrap());
        assert_eq!(store.get("p1").unwrap().unwrap().content, "two");

        assert!(store.remove("p1").unwrap());
        assert!(!store.update(&changed).unwrap());
    }

    #[test]
    fn test_no_native_space_filter() {
        let store = store();
        assert!(!store.supports_space_filter());
        store
            .add(
                &KnowledgePiece::new("deploy notes", KnowledgeType::Note)
                    .with_id("dev")
                    .with_space(Space::Developmental),
            )
            .unwrap();

        let filter = PieceFilter::new().with_spaces(vec![Space::Main]);
        let query = PieceQuery::new("deploy", 5).with_filter(filter);
        let results = store.search(&query).unwrap();
        // spaces are ignored here; callers post-filter
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_search_applies_other_filters() {
        let store = store();
        store
            .add(&KnowledgePiece::new("deploy a", KnowledgeType::Note).with_id("a"))
            .unwrap();
        store
            .add(
                &KnowledgePiece::new("deploy b", KnowledgeType::Note)
                    .with_id("b")
                    .with_entity("user-1"),
            )
            .unwrap();

        let filter = PieceFilter::new().with_scope(crate::backend::EntityScope::Global);
        let results = store
            .search(&PieceQuery::new("deploy", 5).with_filter(filter))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "a");
    }
}
