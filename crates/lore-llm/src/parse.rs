//! Decoding loosely-formatted model output into strict types.

use serde::de::DeserializeOwned;

use crate::error::{LlmError, Result};

/// Strip markdown code fences from model output.
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();

    if let Some(rest) = s.strip_prefix("```json")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }
    if let Some(rest) = s.strip_prefix("```")
        && let Some(inner) = rest.strip_suffix("```")
    {
        return inner.trim();
    }

    s
}

/// Find the outermost `{...}` span in the text.
pub fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end > start {
        Some(&s[start..=end])
    } else {
        None
    }
}

/// Parse a JSON object out of a model response.
///
/// Tries the fence-stripped text first, then the outermost `{...}` span.
/// Anything else is a [`LlmError::Serialization`] error.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = strip_code_fences(raw);

    let first_err = match serde_json::from_str::<T>(cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(json_str) = extract_json_object(cleaned)
        && let Ok(value) = serde_json::from_str::<T>(json_str)
    {
        return Ok(value);
    }

    Err(LlmError::Serialization(format!(
        "unparseable model response: {}",
        first_err
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        action: String,
        #[serde(default)]
        reasoning: Option<String>,
    }

    #[test]
    fn test_parse_plain_json() {
        let d: Decision = parse_json_response(r#"{"action": "ADD"}"#).unwrap();
        assert_eq!(d.action, "ADD");
        assert!(d.reasoning.is_none());
    }

    #[test]
    fn test_parse_with_code_fences() {
        let raw = "```json\n{\"action\": \"MERGE\", \"reasoning\": \"overlap\"}\n```";
        let d: Decision = parse_json_response(raw).unwrap();
        assert_eq!(d.action, "MERGE");
        assert_eq!(d.reasoning.as_deref(), Some("overlap"));
    }

    #[test]
    fn test_parse_with_surrounding_text() {
        let raw = "Sure, here it is:\n{\"action\": \"NO_OP\"}\nHope that helps!";
        let d: Decision = parse_json_response(raw).unwrap();
        assert_eq!(d.action, "NO_OP");
    }

    #[test]
    fn test_parse_garbage_is_serialization_error() {
        let err = parse_json_response::<Decision>("not json at all").unwrap_err();
        assert!(matches!(err, LlmError::Serialization(_)));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("  hello  "), "hello");
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("prefix {\"a\": 1} suffix"),
            Some("{\"a\": 1}")
        );
        assert!(extract_json_object("no json here").is_none());
    }
}
