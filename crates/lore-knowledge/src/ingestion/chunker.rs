//! Header-aware markdown chunking.
//!
//! The document is split into sections at headers up to a configured depth.
//! Each section remembers the header path leading to it. Adjacent small
//! sections are merged and oversized ones are hard-split, preferring
//! paragraph, then line, then word boundaries over mid-word cuts.

use lore_config::IngestionConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkerSettings {
    pub max_chunk_chars: usize,
    pub min_chunk_chars: usize,
    /// Characters of the previous piece repeated at the start of the next
    /// when a section is hard-split.
    pub overlap_chars: usize,
    pub header_levels: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

impl From<&IngestionConfig> for ChunkerSettings {
    fn from(config: &IngestionConfig) -> Self {
        let max_chunk_chars = config.max_chunk_chars.max(1);
        // overlap must leave room for new text in every piece
        let overlap_chars = if config.overlap_chars >= max_chunk_chars {
            max_chunk_chars / 4
        } else {
            config.overlap_chars
        };
        Self {
            max_chunk_chars,
            min_chunk_chars: config.min_chunk_chars.min(max_chunk_chars),
            overlap_chars,
            header_levels: config.header_levels.clamp(1, 6),
        }
    }
}

/// One unit of text sent to the structuring prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    /// Header titles from the outermost section inward.
    pub header_context: Vec<String>,
}

impl Chunk {
    /// `"Top > Sub > Leaf"`, or empty before the first header.
    pub fn breadcrumb(&self) -> String {
        self.header_context.join(" > ")
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Debug)]
struct Section {
    header_context: Vec<String>,
    body: String,
}

impl Section {
    fn char_len(&self) -> usize {
        self.body.chars().count()
    }
}

pub struct MarkdownChunker {
    settings: ChunkerSettings,
}

impl MarkdownChunker {
    pub fn new(settings: ChunkerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ChunkerSettings {
        &self.settings
    }

    /// Split `text` into indexed chunks. Blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let sections = self.merge_small(self.split_sections(text));

        let mut chunks = Vec::new();
        for section in sections {
            for content in self.split_oversized(&section.body) {
                chunks.push(Chunk {
                    index: chunks.len(),
                    content,
                    header_context: section.header_context.clone(),
                });
            }
        }
        chunks
    }

    fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut body = String::new();
        let mut in_fence = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") || line.trim_start().starts_with("~~~") {
                in_fence = !in_fence;
            }
            let header = if in_fence { None } else { parse_header(line) };

            match header {
                Some((level, title)) if level <= self.settings.header_levels => {
                    push_section(&mut sections, &stack, std::mem::take(&mut body));
                    stack.retain(|(l, _)| *l < level);
                    stack.push((level, title));
                }
                _ => {}
            }
            body.push_str(line);
            body.push('\n');
        }
        push_section(&mut sections, &stack, body);
        sections
    }

    /// Fold each small section into its predecessor while the result fits.
    fn merge_small(&self, sections: Vec<Section>) -> Vec<Section> {
        let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
        for section in sections {
            if let Some(last) = merged.last_mut() {
                let combined = last.char_len() + section.char_len() + 2;
                let small = last.char_len() < self.settings.min_chunk_chars
                    || section.char_len() < self.settings.min_chunk_chars;
                if small && combined <= self.settings.max_chunk_chars {
                    last.body.push_str("\n\n");
                    last.body.push_str(&section.body);
                    continue;
                }
            }
            merged.push(section);
        }
        merged
    }

    fn split_oversized(&self, body: &str) -> Vec<String> {
        let max = self.settings.max_chunk_chars;
        if body.chars().count() <= max {
            return vec![body.to_string()];
        }

        // leave room for the overlap lead and its newline
        let budget = match self.settings.overlap_chars {
            0 => max,
            overlap => max.saturating_sub(overlap + 1).max(1),
        };
        let mut pieces: Vec<String> = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let (head, tail) = if rest.chars().count() <= budget {
                (rest, "")
            } else {
                rest.split_at(boundary_before(rest, budget))
            };
            let head = head.trim();
            if !head.is_empty() {
                pieces.push(head.to_string());
            }
            rest = tail.trim_start();
        }

        if self.settings.overlap_chars == 0 {
            return pieces;
        }
        let mut out = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            if i == 0 {
                out.push(piece.clone());
                continue;
            }
            let lead = overlap_tail(&pieces[i - 1], self.settings.overlap_chars);
            if lead.is_empty() {
                out.push(piece.clone());
            } else {
                out.push(format!("{}\n{}", lead, piece));
            }
        }
        out
    }
}

/// `(level, title)` for an ATX header line.
fn parse_header(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    Some((level, title.to_string()))
}

fn push_section(sections: &mut Vec<Section>, stack: &[(usize, String)], body: String) {
    if body.trim().is_empty() {
        return;
    }
    sections.push(Section {
        header_context: stack.iter().map(|(_, t)| t.clone()).collect(),
        body: body.trim_end().to_string(),
    });
}

/// Byte offset of the best cut at or before `max_chars` characters.
fn boundary_before(text: &str, max_chars: usize) -> usize {
    let window_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let window = &text[..window_end];

    // a separator in the first half of the window would leave a stub
    let half = window.len() / 2;
    for sep in ["\n\n", "\n", " "] {
        if let Some(pos) = window.rfind(sep)
            && pos >= half
        {
            return pos + sep.len();
        }
    }
    match window.char_indices().rev().find(|(_, c)| c.is_whitespace()) {
        Some((pos, c)) if pos > 0 => pos + c.len_utf8(),
        _ => window_end,
    }
}

/// The last `chars` characters of `text`, starting at a word boundary.
fn overlap_tail(text: &str, chars: usize) -> &str {
    let total = text.chars().count();
    if total <= chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, min: usize, overlap: usize) -> MarkdownChunker {
        MarkdownChunker::new(ChunkerSettings {
            max_chunk_chars: max,
            min_chunk_chars: min,
            overlap_chars: overlap,
            header_levels: 3,
        })
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header("## Setup"), Some((2, "Setup".to_string())));
        assert_eq!(parse_header("### Closed ###"), Some((3, "Closed".to_string())));
        assert_eq!(parse_header("#hashtag"), None);
        assert_eq!(parse_header("plain"), None);
    }

    #[test]
    fn test_breadcrumbs_follow_nesting() {
        let doc = "# Guide\nintro\n## Install\nrun it\n### Linux\napt\n## Usage\ncall it\n";
        let chunks = chunker(1000, 0, 0).chunk(doc);
        let crumbs: Vec<String> = chunks.iter().map(|c| c.breadcrumb()).collect();
        assert_eq!(
            crumbs,
            vec!["Guide", "Guide > Install", "Guide > Install > Linux", "Guide > Usage"]
        );
        assert!(chunks[1].content.starts_with("## Install"));
    }

    #[test]
    fn test_deeper_headers_stay_in_section() {
        let doc = "# A\ntext\n#### Deep\nmore\n";
        let chunks = chunker(1000, 0, 0).chunk(doc);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("#### Deep"));
    }

    #[test]
    fn test_headers_in_code_fences_ignored() {
        let doc = "# Shell\n```\n# not a header\n```\n";
        let chunks = chunker(1000, 0, 0).chunk(doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_context, vec!["Shell"]);
    }

    #[test]
    fn test_small_sections_merge() {
        let doc = "# A\none\n# B\ntwo\n# C\nthree\n";
        let chunks = chunker(1000, 100, 0).chunk(doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_context, vec!["A"]);
        assert!(chunks[0].content.contains("# C"));
    }

    #[test]
    fn test_oversized_section_splits_on_words() {
        let body = "alpha beta gamma delta ".repeat(20);
        let doc = format!("# Big\n{}", body);
        let chunks = chunker(100, 0, 0).chunk(&doc);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.char_len() <= 100, "chunk too long: {}", c.char_len());
            assert_eq!(c.header_context, vec!["Big"]);
            // never cut inside a word
            for word in c.content.split_whitespace() {
                assert!(["#", "Big", "alpha", "beta", "gamma", "delta"].contains(&word), "{word}");
            }
        }
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let doc = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunker(30, 0, 10).chunk(doc);
        assert!(chunks.len() >= 2);
        let first_tail = chunks[0].content.split_whitespace().last().unwrap();
        assert!(chunks[1].content.contains(first_tail));
        for c in &chunks {
            assert!(c.char_len() <= 30);
        }
    }

    #[test]
    fn test_unbroken_text_hard_cut() {
        let doc = "x".repeat(250);
        let chunks = chunker(100, 0, 0).chunk(&doc);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].char_len(), 50);
    }

    #[test]
    fn test_blank_input() {
        assert!(chunker(100, 0, 0).chunk("  \n\n").is_empty());
    }

    #[test]
    fn test_settings_clamp_overlap() {
        let config = IngestionConfig {
            max_chunk_chars: 100,
            overlap_chars: 500,
            ..IngestionConfig::default()
        };
        let settings = ChunkerSettings::from(&config);
        assert_eq!(settings.overlap_chars, 25);
        assert_eq!(settings.min_chunk_chars, 100);
    }
}
