//! Ingestion report.

use std::path::PathBuf;

use serde::Serialize;

/// Summary of one document ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub chunks: usize,
    /// Chunks whose payload never validated.
    pub chunks_failed: usize,
    /// Pieces in the merged payload, before enhancement.
    pub pieces_structured: usize,
    pub pieces_added: usize,
    /// Existing pieces replaced by a new version.
    pub pieces_superseded: usize,
    /// Dropped as duplicates of stored pieces.
    pub pieces_skipped: usize,
    /// Stored with a pending merge suggestion.
    pub pieces_suggested: usize,
    /// Stored but routed away from main by validation.
    pub pieces_invalid: usize,
    pub metadata_saved: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    /// Debug session directory, when one was recorded.
    pub debug_dir: Option<PathBuf>,
    /// Non-fatal errors, per chunk or per item.
    pub errors: Vec<String>,
}

impl IngestionReport {
    /// Pieces that ended up written, new or as a superseding version.
    pub fn pieces_written(&self) -> usize {
        self.pieces_added + self.pieces_superseded
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IngestionReport {{ chunks: {} (failed: {}), pieces: {} (added: {}, superseded: {}, skipped: {}, suggested: {}, invalid: {}), metadata: {}, nodes: {}, edges: {}, errors: {} }}",
            self.chunks,
            self.chunks_failed,
            self.pieces_structured,
            self.pieces_added,
            self.pieces_superseded,
            self.pieces_skipped,
            self.pieces_suggested,
            self.pieces_invalid,
            self.metadata_saved,
            self.nodes_added,
            self.edges_added,
            self.errors.len(),
        )
    }
}
