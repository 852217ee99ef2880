//! Structuring prompt: turns one markdown chunk into an ingestion payload.

use super::chunker::Chunk;

/// Builds the prompt that asks the LLM to structure a chunk.
pub struct StructuringPrompt;

impl StructuringPrompt {
    /// `total` is the number of chunks in the document. `entity_id` is
    /// attached to personal knowledge when the document belongs to one
    /// entity.
    pub fn build(chunk: &Chunk, total: usize, entity_id: Option<&str>) -> String {
        let mut prompt = String::with_capacity(chunk.content.len() + 4096);

        prompt.push_str(STRUCTURING_INSTRUCTION);
        prompt.push_str("\n\n---\n\n");
        prompt.push_str(&format!("Chunk {} of {}\n", chunk.index + 1, total.max(1)));
        if !chunk.header_context.is_empty() {
            prompt.push_str(&format!("Section: {}\n", chunk.breadcrumb()));
        }
        if let Some(entity) = entity_id {
            prompt.push_str(&format!("Owning entity: {}\n", entity));
        }
        prompt.push_str("\nText:\n\n");
        prompt.push_str(&chunk.content);
        prompt.push_str("\n\nRespond with ONLY the JSON object. No markdown, no explanation.\n");

        prompt
    }

    /// The prompt for a retry, carrying the reason the last answer was rejected.
    pub fn build_retry(chunk: &Chunk, total: usize, entity_id: Option<&str>, error: &str) -> String {
        let mut prompt = Self::build(chunk, total, entity_id);
        prompt.push_str(&format!(
            "\nYour previous answer was rejected: {}\nFix the problem and answer again.\n",
            error
        ));
        prompt
    }
}

const STRUCTURING_INSTRUCTION: &str = r#"You are a knowledge structuring system. Turn the text into knowledge pieces, entity metadata and graph relations.

Return a JSON object with this structure:
```json
{
  "metadata": {
    "<entity_id>": {"entity_type": "...", "properties": {"key": "value"}}
  },
  "pieces": [
    {
      "id": "...",
      "content": "...",
      "knowledge_type": "fact|instruction|preference|procedure|note|episodic|example",
      "info_type": "instructions|context|skills|episodic",
      "tags": ["..."],
      "domain": "...",
      "summary": "..."
    }
  ],
  "graph": {
    "nodes": [{"node_id": "...", "node_type": "...", "label": "...", "properties": {}}],
    "edges": [{"source_id": "...", "target_id": "...", "edge_type": "...", "properties": {"piece_id": "..."}}]
  }
}
```

Rules:
- Every piece needs `id`, `content`, `knowledge_type` and `info_type`
- Derive `id` from the section and subject in kebab-case so the same knowledge gets the same id in every chunk
- One self-contained statement per piece; keep the original wording where possible
- `info_type` decides the prompt section: directives go to "instructions", procedures to "skills", everything else to "context"
- Put stable attributes of an entity (name, role, timezone, ...) in `metadata`, not in pieces
- Link an edge to the piece it came from with `properties.piece_id`
- If the text holds nothing worth keeping, return `{"metadata": {}, "pieces": [], "graph": {"nodes": [], "edges": []}}`"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk {
            index: 1,
            content: "Run cargo dist after tagging.".to_string(),
            header_context: vec!["Guide".to_string(), "Release".to_string()],
        }
    }

    #[test]
    fn test_prompt_carries_position_and_context() {
        let prompt = StructuringPrompt::build(&chunk(), 3, Some("team-a"));
        assert!(prompt.contains("Chunk 2 of 3"));
        assert!(prompt.contains("Section: Guide > Release"));
        assert!(prompt.contains("Owning entity: team-a"));
        assert!(prompt.contains("Run cargo dist after tagging."));
        assert!(prompt.ends_with("No markdown, no explanation.\n"));
    }

    #[test]
    fn test_retry_prompt_names_error() {
        let prompt = StructuringPrompt::build_retry(&chunk(), 3, None, "pieces[0]: missing required field 'id'");
        assert!(prompt.contains("rejected: pieces[0]"));
        assert!(!prompt.contains("Owning entity"));
    }
}
