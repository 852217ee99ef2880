//! Document ingester: chunk, structure, merge, enhance, load.
//!
//! 1. Split the document with [`MarkdownChunker`]
//! 2. Structure every chunk through the LLM, a bounded number at a time,
//!    retrying a chunk until its payload validates
//! 3. Merge chunk payloads into one document payload
//! 4. Enhance each piece: dedup, validation, merge decisioning
//! 5. Load: metadata, every new piece, then retire what they replace,
//!    then the graph
//!
//! A failing chunk only costs its own pieces; the others still load.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use lore_config::{IngestionConfig, LoreConfig};
use lore_llm::SharedCompleter;
use lore_types::{DedupAction, Id, KnowledgePiece, MergeAction, ValidationStatus, new_id};
use tracing::{debug, info, warn};

use super::chunker::{Chunk, ChunkerSettings, MarkdownChunker};
use super::debug::DebugSession;
use super::prompt::StructuringPrompt;
use super::report::IngestionReport;
use super::schema::{GraphSection, IngestionDocument, merge_documents, parse_document};
use crate::embedding::ensure_embedding;
use crate::error::{KnowledgeError, Result};
use crate::kb::KnowledgeBase;
use crate::lifecycle::{ContentValidator, Deduplicator, MergeStrategyManager, retire};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    /// Extra attempts per chunk after the first.
    pub max_retries: usize,
    pub concurrency: usize,
    pub enhance: bool,
    pub debug_dir: Option<PathBuf>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for IngestSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            concurrency: config.concurrency.max(1),
            enhance: config.enhance,
            debug_dir: config.debug_dir.clone(),
        }
    }
}

/// The merged payload of a document before anything is written.
#[derive(Debug, Clone, Default)]
pub struct StructuredDocument {
    pub chunks: usize,
    pub chunks_failed: usize,
    pub document: IngestionDocument,
    pub errors: Vec<String>,
}

/// A piece ready to store, and the stored piece it replaces.
#[derive(Debug)]
struct Planned {
    piece: KnowledgePiece,
    replaces: Option<Id>,
}

pub struct DocumentIngester {
    kb: Arc<KnowledgeBase>,
    completer: Option<SharedCompleter>,
    chunker: MarkdownChunker,
    settings: IngestSettings,
    deduplicator: Option<Arc<Deduplicator>>,
    validator: Option<Arc<ContentValidator>>,
    merger: Option<Arc<MergeStrategyManager>>,
}

impl DocumentIngester {
    pub fn new(kb: Arc<KnowledgeBase>, completer: SharedCompleter, settings: IngestSettings) -> Self {
        Self {
            completer: Some(completer),
            ..Self::loader(kb, settings)
        }
    }

    /// An ingester for already-structured payloads. Markdown ingestion
    /// fails every chunk.
    pub fn loader(kb: Arc<KnowledgeBase>, settings: IngestSettings) -> Self {
        Self {
            kb,
            completer: None,
            chunker: MarkdownChunker::new(ChunkerSettings::default()),
            settings,
            deduplicator: None,
            validator: None,
            merger: None,
        }
    }

    /// Chunking and ingestion settings from `[ingestion]`. Without a
    /// completer the result is a [`loader`](Self::loader).
    pub fn from_config(
        kb: Arc<KnowledgeBase>,
        completer: Option<SharedCompleter>,
        config: &LoreConfig,
    ) -> Self {
        let ingestion = config.ingestion();
        let settings = IngestSettings::from(&ingestion);
        let ingester = match completer {
            Some(completer) => Self::new(kb, completer, settings),
            None => Self::loader(kb, settings),
        };
        ingester.with_chunker(ChunkerSettings::from(&ingestion))
    }

    pub fn with_chunker(mut self, settings: ChunkerSettings) -> Self {
        self.chunker = MarkdownChunker::new(settings);
        self
    }

    pub fn with_deduplicator(mut self, deduplicator: Arc<Deduplicator>) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    pub fn with_validator(mut self, validator: Arc<ContentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_merger(mut self, merger: Arc<MergeStrategyManager>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.debug_dir = Some(dir.into());
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────

    /// Ingest a markdown document end to end.
    ///
    /// `entity_id` owns every piece that does not name an owner itself.
    pub async fn ingest(&self, text: &str, entity_id: Option<&str>) -> Result<IngestionReport> {
        if text.trim().is_empty() {
            return Err(KnowledgeError::invalid("document is empty"));
        }
        let session = self.open_debug_session();

        let structured = self.structure_with(text, entity_id, session.as_ref()).await;
        if let Some(session) = &session
            && let Err(e) = session.record_merged(&structured.document)
        {
            warn!(error = %e, "Failed to record merged payload");
        }

        let mut report = IngestionReport {
            chunks: structured.chunks,
            chunks_failed: structured.chunks_failed,
            errors: structured.errors,
            ..Default::default()
        };
        let loaded = self.load_into(structured.document, &mut report).await;
        self.close_debug_session(session, &mut report);
        loaded?;

        info!(
            chunks = report.chunks,
            chunks_failed = report.chunks_failed,
            pieces = report.pieces_structured,
            added = report.pieces_added,
            superseded = report.pieces_superseded,
            skipped = report.pieces_skipped,
            errors = report.errors.len(),
            "Document ingestion complete"
        );
        Ok(report)
    }

    /// Chunk and structure a document without writing anything.
    pub async fn structure(&self, text: &str, entity_id: Option<&str>) -> StructuredDocument {
        self.structure_with(text, entity_id, None).await
    }

    /// Load an already-structured payload (raw JSON).
    pub async fn ingest_json(&self, raw: &str) -> Result<IngestionReport> {
        let document = parse_document(raw)?;
        self.load(document).await
    }

    /// Enhance and load a payload.
    pub async fn load(&self, document: IngestionDocument) -> Result<IngestionReport> {
        let mut report = IngestionReport::default();
        self.load_into(document, &mut report).await?;
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Structuring
    // ─────────────────────────────────────────────────────────────────────

    async fn structure_with(
        &self,
        text: &str,
        entity_id: Option<&str>,
        session: Option<&DebugSession>,
    ) -> StructuredDocument {
        let chunks = self.chunker.chunk(text);
        let total = chunks.len();
        debug!(chunks = total, "Chunked document");

        if let Some(session) = session {
            for chunk in &chunks {
                if let Err(e) = session.record_chunk(chunk) {
                    warn!(chunk = chunk.index, error = %e, "Failed to record chunk");
                }
            }
        }

        let outcomes: Vec<std::result::Result<IngestionDocument, String>> =
            futures::stream::iter(chunks.iter().map(|c| self.structure_chunk(c, total, entity_id, session)))
                .buffered(self.settings.concurrency.max(1))
                .collect()
                .await;

        let mut structured = StructuredDocument {
            chunks: total,
            ..Default::default()
        };
        let mut documents = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(document) => documents.push(document),
                Err(e) => {
                    structured.chunks_failed += 1;
                    structured.errors.push(e);
                }
            }
        }
        structured.document = merge_documents(documents);
        structured
    }

    async fn structure_chunk(
        &self,
        chunk: &Chunk,
        total: usize,
        entity_id: Option<&str>,
        session: Option<&DebugSession>,
    ) -> std::result::Result<IngestionDocument, String> {
        let Some(completer) = &self.completer else {
            return Err(format!("chunk {}: no completer configured", chunk.index));
        };
        let attempts = self.settings.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let prompt = if attempt == 0 {
                StructuringPrompt::build(chunk, total, entity_id)
            } else {
                StructuringPrompt::build_retry(chunk, total, entity_id, &last_error)
            };
            if let Some(session) = session {
                let _ = session.record_prompt(chunk.index, attempt, &prompt);
            }

            let raw = match completer.complete(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(chunk = chunk.index, attempt, error = %e, "Structuring call failed");
                    last_error = e.to_string();
                    continue;
                }
            };
            if let Some(session) = session {
                let _ = session.record_response(chunk.index, attempt, &raw);
            }

            match parse_document(&raw) {
                Ok(mut document) => {
                    if let Some(owner) = entity_id {
                        for piece in document.pieces.iter_mut().filter(|p| p.entity_id.is_none()) {
                            piece.entity_id = Some(owner.to_string());
                        }
                    }
                    if let Some(session) = session {
                        let _ = session.record_structured(chunk.index, &document);
                        session.log(format!("chunk {} structured on attempt {}", chunk.index, attempt));
                    }
                    debug!(chunk = chunk.index, attempt, pieces = document.pieces.len(), "Structured chunk");
                    return Ok(document);
                }
                Err(e) => {
                    warn!(chunk = chunk.index, attempt, error = %e, "Structured payload rejected");
                    last_error = e.to_string();
                }
            }
        }

        if let Some(session) = session {
            session.log(format!("chunk {} failed: {}", chunk.index, last_error));
        }
        Err(format!(
            "chunk {}: failed after {} attempt(s): {}",
            chunk.index, attempts, last_error
        ))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Enhancement
    // ─────────────────────────────────────────────────────────────────────

    /// Decide what to write for every piece of the payload.
    ///
    /// Returns the plan and a map from payload piece ids to the ids they are
    /// stored under, for rewriting edge links.
    async fn plan(
        &self,
        pieces: Vec<KnowledgePiece>,
        report: &mut IngestionReport,
    ) -> Result<(Vec<Planned>, HashMap<Id, Id>)> {
        let store = self.kb.piece_store();
        let mut plan: Vec<Planned> = Vec::with_capacity(pieces.len());
        let mut renamed: HashMap<Id, Id> = HashMap::new();
        let mut batch_hashes: HashSet<String> = HashSet::new();
        let mut claimed: HashSet<Id> = HashSet::new();

        for mut piece in pieces {
            let payload_id = piece.piece_id.clone();
            let screened = self
                .kb
                .screen_content(&piece.content)
                .and_then(|()| piece.validate().map_err(KnowledgeError::from));
            if let Err(e) = screened {
                warn!(piece_id = %payload_id, error = %e, "Rejected ingested piece");
                report.errors.push(format!("piece {}: {}", payload_id, e));
                continue;
            }
            if !batch_hashes.insert(piece.content_hash.clone()) {
                debug!(piece_id = %payload_id, "Duplicate content within document");
                report.pieces_skipped += 1;
                continue;
            }

            // Same id as a stored piece: unchanged content is a no-op,
            // changed content becomes the next version.
            let mut replaces: Option<Id> = None;
            if let Some(existing) = store.get(&piece.piece_id)? {
                if existing.is_active && existing.content_hash == piece.content_hash {
                    debug!(piece_id = %payload_id, "Stored piece unchanged");
                    report.pieces_skipped += 1;
                    continue;
                }
                piece.piece_id = new_id();
                piece.supersedes = Some(existing.piece_id.clone());
                piece.version = existing.version + 1;
                if existing.is_active {
                    replaces = Some(existing.piece_id);
                }
            }

            ensure_embedding(self.kb.embedder(), &mut piece).await;

            if self.settings.enhance {
                match self.enhance(piece, replaces, report).await? {
                    Some(planned) => {
                        if let Some(old) = planned.replaces.as_ref()
                            && !claimed.insert(old.clone())
                        {
                            // already replaced by an earlier piece of this document
                            report.errors.push(format!(
                                "piece {}: {} is already replaced in this document",
                                payload_id, old
                            ));
                            continue;
                        }
                        renamed.insert(payload_id, planned.piece.piece_id.clone());
                        plan.push(planned);
                    }
                    None => report.pieces_skipped += 1,
                }
            } else {
                if let Some(old) = replaces.as_ref() {
                    claimed.insert(old.clone());
                }
                renamed.insert(payload_id, piece.piece_id.clone());
                plan.push(Planned { piece, replaces });
            }
        }
        Ok((plan, renamed))
    }

    /// Dedup, validate and merge-decide one piece. `None` drops it.
    async fn enhance(
        &self,
        mut piece: KnowledgePiece,
        mut replaces: Option<Id>,
        report: &mut IngestionReport,
    ) -> Result<Option<Planned>> {
        let store = self.kb.piece_store();

        if replaces.is_none()
            && let Some(dedup) = &self.deduplicator
        {
            let result = dedup.deduplicate(&piece).await?;
            match (result.action, result.matched_piece_id) {
                (DedupAction::NoOp, matched) => {
                    debug!(piece_id = %piece.piece_id, matched = ?matched, "Dropped duplicate");
                    return Ok(None);
                }
                (DedupAction::Update, Some(matched)) => {
                    if let Some(existing) = store.get(&matched)? {
                        piece = next_version_of(&existing, piece);
                        replaces = Some(matched);
                    }
                }
                (DedupAction::Merge, Some(matched)) => {
                    if let (Some(merger), Some(existing)) = (&self.merger, store.get(&matched)?) {
                        match merger.merged_version(&existing, &piece).await {
                            Ok(mut merged) => {
                                ensure_embedding(self.kb.embedder(), &mut merged).await;
                                piece = merged;
                                replaces = Some(matched);
                            }
                            Err(e) => {
                                warn!(piece_id = %piece.piece_id, error = %e, "Dedup merge failed, adding piece");
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(validator) = &self.validator {
            let result = validator.check(&mut piece).await;
            if !result.is_valid {
                report.pieces_invalid += 1;
            }
        }

        if replaces.is_none()
            && piece.validation_status != ValidationStatus::Invalid
            && let Some(merger) = &self.merger
        {
            let result = merger.process(piece).await?;
            match result.action {
                MergeAction::Merged => {
                    replaces = result.target_id.clone();
                }
                MergeAction::Suggested => report.pieces_suggested += 1,
                MergeAction::Deferred | MergeAction::Skipped => {}
            }
            piece = result.piece;
            ensure_embedding(self.kb.embedder(), &mut piece).await;
        }

        Ok(Some(Planned { piece, replaces }))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Load
    // ─────────────────────────────────────────────────────────────────────

    async fn load_into(&self, document: IngestionDocument, report: &mut IngestionReport) -> Result<()> {
        report.pieces_structured = document.pieces.len();
        self.load_metadata(&document, report);

        let (plan, mut renamed) = self.plan(document.pieces, report).await?;
        self.load_pieces(plan, &mut renamed, report)?;
        self.load_graph(document.graph, &renamed, report);
        Ok(())
    }

    fn load_metadata(&self, document: &IngestionDocument, report: &mut IngestionReport) {
        if document.metadata.is_empty() {
            return;
        }
        if self.kb.metadata_store().is_none() {
            report
                .errors
                .push(format!("{} metadata record(s) dropped: no metadata store", document.metadata.len()));
            return;
        }

        for (entity_id, entry) in &document.metadata {
            let metadata = match self.kb.get_metadata(entity_id) {
                Ok(Some(mut existing)) => {
                    for (k, v) in &entry.properties {
                        existing.set(k.clone(), v.clone());
                    }
                    existing
                }
                Ok(None) => entry.to_metadata(entity_id),
                Err(e) => {
                    report.errors.push(format!("metadata {}: {}", entity_id, e));
                    continue;
                }
            };
            match self.kb.save_metadata(&metadata) {
                Ok(()) => report.metadata_saved += 1,
                Err(e) => report.errors.push(format!("metadata {}: {}", entity_id, e)),
            }
        }
    }

    /// Add every planned piece, then retire what they replace.
    ///
    /// If an add fails, the pieces added so far are removed and nothing is
    /// retired. If a retire fails, only its replacement is rolled back and
    /// edge links in `renamed` fall back to the version that stayed active.
    fn load_pieces(
        &self,
        plan: Vec<Planned>,
        renamed: &mut HashMap<Id, Id>,
        report: &mut IngestionReport,
    ) -> Result<()> {
        let store = self.kb.piece_store();

        let mut added: Vec<&Planned> = Vec::with_capacity(plan.len());
        for planned in &plan {
            if let Err(e) = store.add(&planned.piece) {
                warn!(piece_id = %planned.piece.piece_id, error = %e, "Add failed, rolling back document");
                for done in &added {
                    if let Err(rollback) = store.remove(&done.piece.piece_id) {
                        warn!(piece_id = %done.piece.piece_id, error = %rollback, "Rollback failed");
                    }
                }
                return Err(e.into());
            }
            added.push(planned);
        }

        for planned in &plan {
            let Some(old) = &planned.replaces else {
                report.pieces_added += 1;
                continue;
            };
            match retire(store.as_ref(), old) {
                Ok(()) => report.pieces_superseded += 1,
                Err(e) => {
                    warn!(new_id = %planned.piece.piece_id, old_id = %old, error = %e, "Retire failed, rolling back new version");
                    if let Err(rollback) = store.remove(&planned.piece.piece_id) {
                        warn!(piece_id = %planned.piece.piece_id, error = %rollback, "Rollback failed");
                    }
                    for stored in renamed.values_mut() {
                        if *stored == planned.piece.piece_id {
                            *stored = old.clone();
                        }
                    }
                    report.errors.push(format!("supersede {}: {}", old, e));
                }
            }
        }
        Ok(())
    }

    fn load_graph(
        &self,
        graph: GraphSection,
        renamed: &HashMap<Id, Id>,
        report: &mut IngestionReport,
    ) {
        if graph.nodes.is_empty() && graph.edges.is_empty() {
            return;
        }
        let Some(store) = self.kb.graph_store() else {
            report.errors.push("graph dropped: no graph store".to_string());
            return;
        };

        for node in &graph.nodes {
            match store.add_node(node) {
                Ok(()) => report.nodes_added += 1,
                Err(e) => report.errors.push(format!("node {}: {}", node.node_id, e)),
            }
        }
        for edge in graph.edges {
            let stored = edge.piece_id().and_then(|id| renamed.get(id)).cloned();
            let edge = match stored {
                Some(id) => edge.with_piece(id),
                None => edge,
            };
            match store.add_edge(&edge) {
                Ok(()) => report.edges_added += 1,
                Err(e) => report.errors.push(format!(
                    "edge {} -[{}]-> {}: {}",
                    edge.source_id, edge.edge_type, edge.target_id, e
                )),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Debug sessions
    // ─────────────────────────────────────────────────────────────────────

    fn open_debug_session(&self) -> Option<DebugSession> {
        let dir = self.settings.debug_dir.as_ref()?;
        match DebugSession::create(dir, "ingest") {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Could not create debug session");
                None
            }
        }
    }

    fn close_debug_session(&self, session: Option<DebugSession>, report: &mut IngestionReport) {
        let Some(session) = session else {
            return;
        };
        report.debug_dir = Some(session.root().to_path_buf());
        if let Err(e) = session.finish(report) {
            warn!(dir = %session.root().display(), error = %e, "Failed to write debug summary");
        }
    }
}

/// `incoming`'s content as the next version of `existing`.
fn next_version_of(existing: &KnowledgePiece, incoming: KnowledgePiece) -> KnowledgePiece {
    let mut next = existing.superseding(incoming.content);
    next.tags = lore_types::normalize_tags(existing.tags.iter().chain(incoming.tags.iter()));
    next.embedding = incoming.embedding;
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    use lore_llm::MockCompleter;
    use lore_memory::{
        InMemoryGraphStore, InMemoryMetadataStore, InMemoryPieceStore, KnowledgePieceStore,
        PieceFilter,
    };
    use lore_types::{KnowledgeType, MergeStrategy};
    use serde_json::json;

    use crate::lifecycle::testing::FailingRetireStore;
    use crate::lifecycle::{DedupSettings, MergeSettings};

    fn payload(pieces: Vec<serde_json::Value>) -> String {
        json!({"pieces": pieces}).to_string()
    }

    fn piece(id: &str, content: &str) -> serde_json::Value {
        json!({"id": id, "content": content, "knowledge_type": "fact", "info_type": "context"})
    }

    fn kb() -> (Arc<InMemoryPieceStore>, Arc<KnowledgeBase>) {
        let pieces = Arc::new(InMemoryPieceStore::new());
        let kb = KnowledgeBase::new(pieces.clone())
            .with_metadata_store(Arc::new(InMemoryMetadataStore::new()))
            .with_graph_store(Arc::new(InMemoryGraphStore::new()));
        (pieces, Arc::new(kb))
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            max_retries: 1,
            concurrency: 2,
            enhance: false,
            debug_dir: None,
        }
    }

    fn small_chunks() -> ChunkerSettings {
        ChunkerSettings {
            max_chunk_chars: 200,
            min_chunk_chars: 0,
            overlap_chars: 0,
            header_levels: 2,
        }
    }

    const DOC: &str = "# One\nfirst section\n# Two\nsecond section\n";

    #[tokio::test]
    async fn test_ingest_loads_every_chunk() {
        let (pieces, kb) = kb();
        let completer = Arc::new(MockCompleter::new([
            payload(vec![piece("a", "alpha fact")]),
            payload(vec![piece("b", "beta fact")]),
        ]));
        let ingester = DocumentIngester::new(kb, completer.clone(), settings()).with_chunker(small_chunks());

        let report = ingester.ingest(DOC, Some("team")).await.unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(report.pieces_added, 2);
        assert!(!report.has_errors(), "{:?}", report.errors);
        let a = pieces.get("a").unwrap().unwrap();
        assert_eq!(a.entity_id.as_deref(), Some("team"));
        assert!(completer.prompts().iter().any(|p| p.contains("Section: Two")));
    }

    #[tokio::test]
    async fn test_bad_chunk_retries_then_fails_alone() {
        let (pieces, kb) = kb();
        // buffered keeps chunk order for results, not for calls; answer by section
        let completer = Arc::new(MockCompleter::with_fn(|prompt: &str| {
            if prompt.contains("Section: One") {
                Ok(payload(vec![piece("a", "alpha fact")]))
            } else {
                Ok("not json at all".to_string())
            }
        }));
        let ingester = DocumentIngester::new(kb, completer.clone(), settings()).with_chunker(small_chunks());

        let report = ingester.ingest(DOC, None).await.unwrap();
        assert_eq!(report.chunks_failed, 1);
        assert_eq!(report.pieces_added, 1);
        assert!(report.errors[0].contains("failed after 2 attempt(s)"));
        assert_eq!(completer.call_count(), 3);
        assert!(completer.prompts().iter().any(|p| p.contains("previous answer was rejected")));
        assert!(pieces.get("a").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_changed_piece_supersedes_stored_version() {
        let (pieces, kb) = kb();
        pieces
            .add(&KnowledgePiece::new("deploys on fridays", KnowledgeType::Fact).with_id("deploy-day"))
            .unwrap();
        let ingester = DocumentIngester::new(kb, Arc::new(MockCompleter::failing("offline")), settings());

        let raw = json!({
            "pieces": [piece("deploy-day", "deploys on mondays")],
            "graph": {
                "nodes": [{"node_id": "ci", "node_type": "tool"}],
                "edges": [{"source_id": "ci", "target_id": "prod", "edge_type": "deploys",
                           "properties": {"piece_id": "deploy-day"}}]
            }
        })
        .to_string();
        let report = ingester.ingest_json(&raw).await.unwrap();
        assert_eq!(report.pieces_superseded, 1);
        assert_eq!(report.edges_added, 1);

        assert!(!pieces.get("deploy-day").unwrap().unwrap().is_active);
        let active = pieces.list_all(&PieceFilter::new()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "deploys on mondays");
        assert_eq!(active[0].supersedes.as_deref(), Some("deploy-day"));
        assert_eq!(active[0].version, 2);

        let graph = ingester.kb.graph_store().unwrap();
        let edges = graph.get_relations("ci", lore_memory::EdgeDirection::Both).unwrap();
        assert_eq!(edges[0].piece_id(), Some(active[0].piece_id.as_str()));
    }

    #[tokio::test]
    async fn test_failed_supersede_links_edges_to_surviving_version() {
        let pieces = Arc::new(FailingRetireStore::default());
        pieces
            .add(&KnowledgePiece::new("deploys on fridays", KnowledgeType::Fact).with_id("deploy-day"))
            .unwrap();
        let kb = KnowledgeBase::new(pieces.clone()).with_graph_store(Arc::new(InMemoryGraphStore::new()));
        let ingester = DocumentIngester::loader(Arc::new(kb), settings());

        let raw = json!({
            "pieces": [piece("deploy-day", "deploys on mondays")],
            "graph": {
                "nodes": [{"node_id": "ci", "node_type": "tool"}],
                "edges": [{"source_id": "ci", "target_id": "prod", "edge_type": "deploys",
                           "properties": {"piece_id": "deploy-day"}}]
            }
        })
        .to_string();
        let report = ingester.ingest_json(&raw).await.unwrap();
        assert_eq!(report.pieces_superseded, 0);
        assert!(report.errors.iter().any(|e| e.starts_with("supersede deploy-day")));

        let active = pieces.list_all(&PieceFilter::new()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].piece_id, "deploy-day");

        let graph = ingester.kb.graph_store().unwrap();
        let edges = graph.get_relations("ci", lore_memory::EdgeDirection::Both).unwrap();
        assert_eq!(edges[0].piece_id(), Some("deploy-day"));
    }

    #[tokio::test]
    async fn test_unchanged_piece_is_skipped() {
        let (pieces, kb) = kb();
        pieces
            .add(&KnowledgePiece::new("deploys on fridays", KnowledgeType::Fact).with_id("deploy-day"))
            .unwrap();
        let ingester = DocumentIngester::new(kb, Arc::new(MockCompleter::failing("offline")), settings());
        let report = ingester
            .ingest_json(&payload(vec![piece("deploy-day", "deploys  on fridays")]))
            .await
            .unwrap();
        assert_eq!(report.pieces_skipped, 1);
        assert_eq!(report.pieces_written(), 0);
    }

    #[tokio::test]
    async fn test_enhancement_drops_duplicates_and_defers_merges() {
        let (pieces, kb) = kb();
        pieces
            .add(&KnowledgePiece::new("cargo dist builds releases", KnowledgeType::Fact).with_id("old"))
            .unwrap();
        let dedup = Deduplicator::new(pieces.clone(), DedupSettings::default());
        let merger = MergeStrategyManager::new(
            pieces.clone(),
            MergeSettings {
                default_strategy: MergeStrategy::PostIngestionAuto,
                ..MergeSettings::default()
            },
        );
        let ingester = DocumentIngester::new(kb, Arc::new(MockCompleter::failing("offline")), IngestSettings {
            enhance: true,
            ..settings()
        })
        .with_deduplicator(Arc::new(dedup))
        .with_merger(Arc::new(merger));

        let report = ingester
            .ingest_json(&payload(vec![
                piece("copy", "cargo dist  builds releases"),
                piece("fresh", "tags trigger the release workflow"),
            ]))
            .await
            .unwrap();
        assert_eq!(report.pieces_skipped, 1);
        assert_eq!(report.pieces_added, 1);
        assert!(pieces.get("copy").unwrap().is_none());
        assert!(!pieces.get("fresh").unwrap().unwrap().merge_processed);
    }

    #[tokio::test]
    async fn test_metadata_merges_properties() {
        let (_, kb) = kb();
        kb.save_metadata(&lore_types::EntityMetadata::new("u1", "user").with_property("tz", "UTC"))
            .unwrap();
        let ingester = DocumentIngester::new(kb.clone(), Arc::new(MockCompleter::failing("offline")), settings());
        let raw = json!({"metadata": {"u1": {"entity_type": "user", "properties": {"lang": "en"}}}}).to_string();

        let report = ingester.ingest_json(&raw).await.unwrap();
        assert_eq!(report.metadata_saved, 1);
        let stored = kb.get_metadata("u1").unwrap().unwrap();
        assert_eq!(stored.get("tz"), Some(&json!("UTC")));
        assert_eq!(stored.get("lang"), Some(&json!("en")));
    }

    #[tokio::test]
    async fn test_debug_session_written() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, kb) = kb();
        let completer = Arc::new(MockCompleter::with_fn(|_: &str| Ok(payload(vec![piece("a", "alpha")]))));
        let ingester = DocumentIngester::new(kb, completer, settings())
            .with_chunker(small_chunks())
            .with_debug_dir(tmp.path());

        let report = ingester.ingest(DOC, None).await.unwrap();
        let root = report.debug_dir.unwrap();
        assert!(root.join("summary.json").is_file());
        assert!(root.join("merged/document.json").is_file());
        assert!(root.join("responses/chunk-001-attempt-0.txt").is_file());
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let (_, kb) = kb();
        let ingester = DocumentIngester::new(kb, Arc::new(MockCompleter::failing("offline")), settings());
        assert!(matches!(ingester.ingest("  ", None).await, Err(KnowledgeError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_loader_structures_nothing_but_loads_payloads() {
        let (pieces, kb) = kb();
        let ingester = DocumentIngester::loader(kb, settings()).with_chunker(small_chunks());

        let structured = ingester.structure(DOC, None).await;
        assert_eq!(structured.chunks_failed, 2);
        assert!(structured.errors[0].contains("no completer configured"));

        let report = ingester.ingest_json(&payload(vec![piece("a", "alpha fact")])).await.unwrap();
        assert_eq!(report.pieces_added, 1);
        assert!(pieces.get("a").unwrap().is_some());
    }
}
