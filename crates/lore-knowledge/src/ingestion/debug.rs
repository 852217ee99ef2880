//! On-disk record of one ingestion run for postmortem inspection.
//!
//! Layout under `<base>/<label>-<timestamp>-<suffix>/`:
//!
//! ```text
//! chunks/      chunk-000.json          chunk text and header context
//! prompts/     chunk-000-attempt-0.txt
//! responses/   chunk-000-attempt-0.txt raw model output
//! structured/  chunk-000.json          validated per-chunk payload
//! merged/      document.json           merged payload
//! logs/        session.log
//! summary.json                         every artifact path plus the report
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::chunker::Chunk;
use super::report::IngestionReport;
use super::schema::IngestionDocument;
use crate::error::Result;

const STAGES: &[&str] = &["chunks", "prompts", "responses", "structured", "merged", "logs"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<usize>,
    pub path: PathBuf,
}

#[derive(Serialize)]
struct Summary<'a> {
    root: &'a Path,
    started_at: String,
    finished_at: String,
    artifacts: &'a [Artifact],
    report: &'a IngestionReport,
}

pub struct DebugSession {
    root: PathBuf,
    started_at: String,
    artifacts: Mutex<Vec<Artifact>>,
    log: Mutex<Vec<String>>,
}

impl DebugSession {
    /// Create a fresh session directory with every stage folder.
    pub fn create(base: &Path, label: &str) -> Result<Self> {
        let now = Utc::now();
        let suffix: String = lore_types::new_id().chars().take(8).collect();
        let root = base.join(format!("{}-{}-{}", label, now.format("%Y%m%dT%H%M%S"), suffix));
        for stage in STAGES {
            fs::create_dir_all(root.join(stage))?;
        }
        debug!(root = %root.display(), "Created debug session");
        Ok(Self {
            root,
            started_at: now.to_rfc3339(),
            artifacts: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn record_chunk(&self, chunk: &Chunk) -> Result<PathBuf> {
        let body = serde_json::to_string_pretty(chunk)?;
        self.write("chunks", Some(chunk.index), format!("chunk-{:03}.json", chunk.index), &body)
    }

    pub fn record_prompt(&self, chunk: usize, attempt: usize, prompt: &str) -> Result<PathBuf> {
        self.write("prompts", Some(chunk), attempt_file(chunk, attempt), prompt)
    }

    pub fn record_response(&self, chunk: usize, attempt: usize, raw: &str) -> Result<PathBuf> {
        self.write("responses", Some(chunk), attempt_file(chunk, attempt), raw)
    }

    pub fn record_structured(&self, chunk: usize, document: &IngestionDocument) -> Result<PathBuf> {
        let body = serde_json::to_string_pretty(document)?;
        self.write("structured", Some(chunk), format!("chunk-{:03}.json", chunk), &body)
    }

    pub fn record_merged(&self, document: &IngestionDocument) -> Result<PathBuf> {
        let body = serde_json::to_string_pretty(document)?;
        self.write("merged", None, "document.json".to_string(), &body)
    }

    /// Buffer a log line; lines are written by [`finish`](Self::finish).
    pub fn log(&self, line: impl Into<String>) {
        let stamped = format!("{} {}", Utc::now().to_rfc3339(), line.into());
        self.log.lock().push(stamped);
    }

    /// Flush the log and write `summary.json`. Returns the summary path.
    pub fn finish(&self, report: &IngestionReport) -> Result<PathBuf> {
        let lines = self.log.lock().join("\n");
        self.write("logs", None, "session.log".to_string(), &lines)?;

        let artifacts = self.artifacts.lock().clone();
        let summary = Summary {
            root: &self.root,
            started_at: self.started_at.clone(),
            finished_at: Utc::now().to_rfc3339(),
            artifacts: &artifacts,
            report,
        };
        let path = self.root.join("summary.json");
        fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
        Ok(path)
    }

    fn write(&self, stage: &'static str, chunk: Option<usize>, name: String, body: &str) -> Result<PathBuf> {
        let path = self.root.join(stage).join(name);
        fs::write(&path, body)?;
        self.artifacts.lock().push(Artifact {
            stage,
            chunk,
            path: path.clone(),
        });
        Ok(path)
    }
}

fn attempt_file(chunk: usize, attempt: usize) -> String {
    format!("chunk-{:03}-attempt-{}.txt", chunk, attempt)
}
