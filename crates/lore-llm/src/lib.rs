//! Completion and embedding interfaces for Lore.
//!
//! The engine never talks to a model directly. Every component that needs
//! judgment or vectors receives one of two narrow, injectable interfaces:
//!
//! ```text
//! ┌─────────────────────────────┐   ┌─────────────────────────────┐
//! │  Completer                  │   │  Embedder                   │
//! │  complete(prompt) -> text   │   │  embed(text) -> Vec<f32>    │
//! └─────────────────────────────┘   └─────────────────────────────┘
//!        │              │                  │              │
//!        ▼              ▼                  ▼              ▼
//! ┌──────────────┐ ┌──────────┐    ┌──────────────┐ ┌──────────┐
//! │OpenAiCompleter│ │  Mock    │    │OpenAiEmbedder│ │  Mock    │
//! └──────────────┘ └──────────┘    └──────────────┘ └──────────┘
//! ```
//!
//! Mock implementations are always available so downstream crates can drive
//! every LLM-dependent path in tests.

pub mod completer;
pub mod embeddings;
pub mod error;
pub mod openai;
pub mod parse;

pub use completer::{Completer, MockCompleter, SharedCompleter, with_retry};
pub use embeddings::{
    Embedder, MockEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig, SharedEmbedder,
    cosine_similarity,
};
pub use error::{LlmError, Result, is_retryable};
pub use openai::{OpenAiCompleter, OpenAiConfig};
pub use parse::{extract_json_object, parse_json_response, strip_code_fences};
