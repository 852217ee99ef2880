//! Content validation.
//!
//! Credential and PII checks are regex rules and always run locally. The
//! remaining categories go to an LLM judge; without one they pass with a
//! warning. Invalid pieces are routed to the developmental space instead of
//! being rejected.

use std::str::FromStr;

use lore_config::ValidationConfig;
use lore_llm::{SharedCompleter, parse_json_response};
use lore_types::{
    KnowledgePiece, Space, ValidationCategory, ValidationResult, ValidationStatus,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::security::{
    CREDENTIAL_PATTERNS, NamedPattern, PII_PATTERNS, compile_patterns, matching_patterns,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSettings {
    pub enabled: bool,
    pub categories: Vec<ValidationCategory>,
    pub route_invalid_to_developmental: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationSettings {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            enabled: config.enabled,
            categories: config.categories.clone(),
            route_invalid_to_developmental: config.route_invalid_to_developmental,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Judge Prompt
// ─────────────────────────────────────────────────────────────────────────────

pub struct ValidationPrompt;

impl ValidationPrompt {
    pub fn build(piece: &KnowledgePiece, categories: &[ValidationCategory]) -> String {
        let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
        let mut prompt = String::with_capacity(2048);
        prompt.push_str(VALIDATION_INSTRUCTION);
        prompt.push_str(&format!("\n\nCategories to check: {}\n\n", names.join(", ")));
        prompt.push_str(&format!("Knowledge type: {}\n", piece.knowledge_type));
        if let Some(domain) = &piece.domain {
            prompt.push_str(&format!("Domain: {}\n", domain));
        }
        prompt.push_str(&format!("Content:\n{}\n", piece.content));
        prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.\n");
        prompt
    }
}

const VALIDATION_INSTRUCTION: &str = r#"You review a knowledge piece before it is stored.

Check it against each listed category and return a JSON object:
```json
{"passed": ["..."], "failed": ["..."], "issues": ["..."], "suggestions": ["..."]}
```

Categories:
- correctness: the content is factually plausible
- authenticity: the content does not look fabricated or spoofed
- consistency: the content does not contradict itself
- completeness: the content is understandable on its own
- staleness: the content is not obviously outdated
- policy_compliance: the content is appropriate to store
Use the category names exactly as listed. Put every checked category in `passed` or `failed`."#;

#[derive(Debug, Default, Deserialize)]
struct JudgeResponse {
    #[serde(default)]
    passed: Vec<String>,
    #[serde(default)]
    failed: Vec<String>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

pub struct ContentValidator {
    judge: Option<SharedCompleter>,
    credentials: Vec<NamedPattern>,
    pii: Vec<NamedPattern>,
    settings: ValidationSettings,
}

impl ContentValidator {
    pub fn new(settings: ValidationSettings) -> Result<Self> {
        Ok(Self {
            judge: None,
            credentials: compile_patterns(CREDENTIAL_PATTERNS)?,
            pii: compile_patterns(PII_PATTERNS)?,
            settings,
        })
    }

    pub fn with_judge(mut self, judge: SharedCompleter) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    fn enabled(&self, category: ValidationCategory) -> bool {
        self.settings.categories.contains(&category)
    }

    /// Run every enabled check. Never fails: judge problems count as passed.
    pub async fn validate(&self, piece: &KnowledgePiece) -> ValidationResult {
        if !self.settings.enabled {
            return ValidationResult::from_checks(vec![], vec![], vec![], vec![]);
        }

        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        for (category, patterns) in [
            (ValidationCategory::Credentials, &self.credentials),
            (ValidationCategory::Pii, &self.pii),
        ] {
            if !self.enabled(category) {
                continue;
            }
            let hits = matching_patterns(patterns, &piece.content);
            if hits.is_empty() {
                passed.push(category);
            } else {
                failed.push(category);
                issues.push(format!("{} pattern matched: {}", category, hits.join(", ")));
                suggestions.push(format!("remove {} from the content", category));
            }
        }

        let judged: Vec<ValidationCategory> = self
            .settings
            .categories
            .iter()
            .copied()
            .filter(|c| !c.is_pattern_based())
            .collect();
        if !judged.is_empty() {
            let response = self.judge(piece, &judged).await;
            debug!(
                passed = response.passed.len(),
                failed = response.failed.len(),
                "Validation judge responded"
            );
            let failed_by_judge: Vec<ValidationCategory> = response
                .failed
                .iter()
                .filter_map(|name| ValidationCategory::from_str(name).ok())
                .filter(|c| judged.contains(c))
                .collect();
            for category in judged {
                if failed_by_judge.contains(&category) {
                    failed.push(category);
                } else {
                    passed.push(category);
                }
            }
            issues.extend(response.issues);
            suggestions.extend(response.suggestions);
        }

        let result = ValidationResult::from_checks(passed, failed, issues, suggestions);
        debug!(
            piece_id = %piece.piece_id,
            valid = result.is_valid,
            confidence = result.confidence,
            "Validated piece"
        );
        result
    }

    async fn judge(&self, piece: &KnowledgePiece, categories: &[ValidationCategory]) -> JudgeResponse {
        let Some(judge) = &self.judge else {
            warn!(piece_id = %piece.piece_id, "No validation judge configured, treating LLM checks as passed");
            return JudgeResponse::default();
        };

        let prompt = ValidationPrompt::build(piece, categories);
        let raw = match judge.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(piece_id = %piece.piece_id, error = %e, "Validation judge failed, treating LLM checks as passed");
                return JudgeResponse::default();
            }
        };
        match parse_json_response::<JudgeResponse>(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(piece_id = %piece.piece_id, error = %e, "Validation judge response malformed, treating LLM checks as passed");
                JudgeResponse::default()
            }
        }
    }

    /// Record `result` on the piece. Invalid pieces leave every other space
    /// for the developmental one when routing is configured.
    pub fn apply(&self, piece: &mut KnowledgePiece, result: &ValidationResult) {
        piece.validation_status = if result.is_valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid
        };
        piece.validation_issues = result.issues.clone();
        if !result.is_valid && self.settings.route_invalid_to_developmental {
            piece.set_spaces(vec![Space::Developmental]);
        }
    }

    /// Validate and apply in one step.
    pub async fn check(&self, piece: &mut KnowledgePiece) -> ValidationResult {
        let result = self.validate(piece).await;
        self.apply(piece, &result);
        result
    }
}
