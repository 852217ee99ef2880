//! Optional-embedder helpers shared by retrieval, lifecycle and ingestion.
//!
//! Every caller treats the embedder as optional and embedding failures as
//! non-fatal: the piece or query simply goes without a vector.

use lore_llm::SharedEmbedder;
use lore_types::KnowledgePiece;
use tracing::warn;

/// Embed `text`, logging and swallowing failures.
pub async fn embed_text(embedder: Option<&SharedEmbedder>, text: &str) -> Option<Vec<f32>> {
    let embedder = embedder?;
    match embedder.embed(text).await {
        Ok(v) if !v.is_empty() => Some(v),
        Ok(_) => {
            warn!("Embedder returned an empty vector");
            None
        }
        Err(e) => {
            warn!(error = %e, "Embedding failed, continuing without a vector");
            None
        }
    }
}

/// Fill in a missing embedding from the piece's embedding text.
///
/// Returns whether the piece carries an embedding afterwards.
pub async fn ensure_embedding(embedder: Option<&SharedEmbedder>, piece: &mut KnowledgePiece) -> bool {
    if piece.embedding.is_some() {
        return true;
    }
    piece.embedding = embed_text(embedder, piece.text_for_embedding()).await;
    piece.embedding.is_some()
}
