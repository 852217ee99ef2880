//! Closed, string-valued enumerations.
//!
//! Every enumeration serializes to the same string that `as_str` returns and
//! parses back through `FromStr`, so values round-trip through SQLite columns,
//! JSON payloads and LLM responses without a separate mapping table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $value:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $value $(, alias = $alias)*)]
                $variant,
            )+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Get the canonical string representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase();
                match normalized.as_str() {
                    $($value $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(TypesError::UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// What kind of knowledge a piece holds.
    KnowledgeType ("knowledge_type") {
        /// A concrete factual claim.
        Fact => "fact",
        /// A directive the agent should follow.
        Instruction => "instruction",
        /// A stated or observed preference.
        Preference => "preference",
        /// A multi-step procedure or skill.
        Procedure => "procedure",
        /// Free-form note.
        Note => "note",
        /// A record of something that happened.
        Episodic => "episodic",
        /// A worked example.
        Example => "example",
    }
}

string_enum! {
    /// Lifecycle and visibility scope of a piece.
    Space ("space") {
        /// Curated, production knowledge.
        Main => "main",
        /// Per-user knowledge.
        Personal => "personal",
        /// Unvetted or invalid knowledge awaiting review.
        Developmental => "developmental",
    }
}

impl Default for Space {
    fn default() -> Self {
        Self::Main
    }
}

string_enum! {
    /// When and how similar pieces are merged.
    MergeStrategy ("merge_strategy") {
        /// Merge immediately during ingestion.
        AutoMergeOnIngest => "auto-merge-on-ingest" | "auto_merge_on_ingest",
        /// Attach a review suggestion during ingestion.
        SuggestionOnIngest => "suggestion-on-ingest" | "suggestion_on_ingest",
        /// Merge later in the background job.
        PostIngestionAuto => "post-ingestion-auto" | "post_ingestion_auto",
        /// Suggest later in the background job.
        PostIngestionSuggestion => "post-ingestion-suggestion" | "post_ingestion_suggestion",
        /// Never merge automatically.
        ManualOnly => "manual-only" | "manual_only",
    }
}

impl MergeStrategy {
    /// Whether processing is deferred to the background merge job.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::PostIngestionAuto | Self::PostIngestionSuggestion)
    }

    /// Whether the strategy merges content (as opposed to suggesting).
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::AutoMergeOnIngest | Self::PostIngestionAuto)
    }
}

string_enum! {
    /// Outcome of applying a merge strategy to a piece.
    MergeAction ("merge_action") {
        /// Content merged into a new superseding version.
        Merged => "merged",
        /// A pending review suggestion was attached.
        Suggested => "suggested",
        /// Processing deferred to the background job.
        Deferred => "deferred",
        /// Nothing to do.
        Skipped => "skipped",
    }
}

string_enum! {
    /// Decision returned by the deduplicator.
    DedupAction ("dedup_action") {
        /// Store as a new piece.
        Add => "add",
        /// Replace the matched piece.
        Update => "update",
        /// Merge with the matched piece.
        Merge => "merge",
        /// Duplicate, drop the incoming piece.
        NoOp => "no_op" | "noop" | "no-op",
    }
}

string_enum! {
    /// How new content is composed with existing content.
    MergeType ("merge_type") {
        /// New content after existing content.
        Append => "append",
        /// New content before existing content.
        Prepend => "prepend",
        /// Paragraphs of both, alternating.
        Interleave => "interleave",
    }
}

string_enum! {
    /// Validation state of a piece.
    ValidationStatus ("validation_status") {
        /// Not validated yet.
        Pending => "pending",
        /// All enabled checks passed.
        Valid => "valid",
        /// One or more checks failed.
        Invalid => "invalid",
    }
}

impl Default for ValidationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

string_enum! {
    /// Review state of a pending merge suggestion.
    SuggestionStatus ("suggestion_status") {
        /// Awaiting review.
        Pending => "pending",
        /// Reviewer accepted the suggestion.
        Accepted => "accepted",
        /// Reviewer rejected the suggestion.
        Rejected => "rejected",
    }
}

string_enum! {
    /// Intent derived from an update request.
    UpdateAction ("update_action") {
        /// Replace the content outright.
        Replace => "replace",
        /// Compose new content with the existing content.
        Merge => "merge",
        /// The update adds nothing.
        NoChange => "no_change" | "no-change" | "nochange",
    }
}

string_enum! {
    /// How a piece is deleted.
    DeleteMode ("delete_mode") {
        /// Mark inactive, retrievable by id for audit.
        Soft => "soft",
        /// Physically remove from the store.
        Hard => "hard",
    }
}

impl Default for DeleteMode {
    fn default() -> Self {
        Self::Soft
    }
}

string_enum! {
    /// Checks run by the content validator.
    ValidationCategory ("validation_category") {
        /// Credentials, secrets and tokens.
        Credentials => "credentials",
        /// Personally identifiable information.
        Pii => "pii",
        /// Factual correctness.
        Correctness => "correctness",
        /// Source authenticity.
        Authenticity => "authenticity",
        /// Internal consistency.
        Consistency => "consistency",
        /// Completeness.
        Completeness => "completeness",
        /// Outdated information.
        Staleness => "staleness",
        /// Policy compliance.
        PolicyCompliance => "policy_compliance" | "policy-compliance",
    }
}

impl ValidationCategory {
    /// Whether the category is checked by fast regex rules rather than an LLM.
    pub fn is_pattern_based(&self) -> bool {
        matches!(self, Self::Credentials | Self::Pii)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str_round_trip() {
        for kt in KnowledgeType::ALL {
            assert_eq!(KnowledgeType::from_str(kt.as_str()).unwrap(), *kt);
        }
        for s in MergeStrategy::ALL {
            assert_eq!(s.as_str().parse::<MergeStrategy>().unwrap(), *s);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive_and_accepts_aliases() {
        assert_eq!("FACT".parse::<KnowledgeType>().unwrap(), KnowledgeType::Fact);
        assert_eq!(
            "post_ingestion_auto".parse::<MergeStrategy>().unwrap(),
            MergeStrategy::PostIngestionAuto
        );
        assert_eq!("NOOP".parse::<DedupAction>().unwrap(), DedupAction::NoOp);
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let err = "opinion".parse::<KnowledgeType>().unwrap_err();
        assert_eq!(
            err,
            TypesError::UnknownVariant {
                kind: "knowledge_type",
                value: "opinion".to_string()
            }
        );
    }

    #[test]
    fn test_serde_uses_string_values() {
        let json = serde_json::to_string(&MergeStrategy::ManualOnly).unwrap();
        assert_eq!(json, "\"manual-only\"");
        let parsed: DedupAction = serde_json::from_str("\"no_op\"").unwrap();
        assert_eq!(parsed, DedupAction::NoOp);
    }

    #[test]
    fn test_strategy_predicates() {
        assert!(MergeStrategy::PostIngestionAuto.is_deferred());
        assert!(MergeStrategy::PostIngestionSuggestion.is_deferred());
        assert!(!MergeStrategy::AutoMergeOnIngest.is_deferred());
        assert!(MergeStrategy::AutoMergeOnIngest.is_auto());
        assert!(!MergeStrategy::SuggestionOnIngest.is_auto());
    }

    #[test]
    fn test_pattern_based_categories() {
        assert!(ValidationCategory::Credentials.is_pattern_based());
        assert!(ValidationCategory::Pii.is_pattern_based());
        assert!(!ValidationCategory::Correctness.is_pattern_based());
    }
}
