//! Document ingestion: chunking, LLM structuring, payload merge and load.

pub mod chunker;
pub mod debug;
pub mod ingester;
pub mod prompt;
mod report;
pub mod schema;

pub use chunker::{Chunk, ChunkerSettings, MarkdownChunker};
pub use debug::{Artifact, DebugSession};
pub use ingester::{DocumentIngester, IngestSettings, StructuredDocument};
pub use prompt::StructuringPrompt;
pub use report::IngestionReport;
pub use schema::{
    GraphSection, IngestionDocument, MetadataEntry, document_from_value, merge_documents,
    parse_document,
};
