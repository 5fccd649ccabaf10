//! Validation of the analysis service reply.
//!
//! The reply is free text expected to contain one JSON object. Every field
//! is required; an unknown severity or priority label is rejected.

use serde::Deserialize;

use super::LlmError;
use crate::models::{AnalysisResult, Priority, Severity};

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    severity: Option<String>,
    priority: Option<String>,
    #[serde(rename = "aiReasoning", alias = "ai_reasoning", alias = "reasoning")]
    ai_reasoning: Option<String>,
    #[serde(rename = "potentialFix", alias = "potential_fix")]
    potential_fix: Option<String>,
}

/// Parse and validate a reply into an [`AnalysisResult`].
pub fn parse_analysis(text: &str) -> Result<AnalysisResult, LlmError> {
    let json = extract_object(text)
        .ok_or_else(|| LlmError::InvalidResponse("no JSON object in reply".to_string()))?;

    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    let severity_label = required(raw.severity, "severity")?;
    let severity = Severity::from_str(&severity_label).ok_or_else(|| {
        LlmError::InvalidResponse(format!("unknown severity '{}'", severity_label))
    })?;

    let priority_label = required(raw.priority, "priority")?;
    let priority = Priority::from_str(&priority_label).ok_or_else(|| {
        LlmError::InvalidResponse(format!("unknown priority '{}'", priority_label))
    })?;

    Ok(AnalysisResult {
        severity,
        priority,
        ai_reasoning: required(raw.ai_reasoning, "aiReasoning")?,
        potential_fix: required(raw.potential_fix, "potentialFix")?,
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, LlmError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(LlmError::InvalidResponse(format!(
            "missing field '{}'",
            field
        ))),
    }
}

/// Slice from the first `{` to the last `}`, tolerating prose or code fences around it.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let result = parse_analysis(
            r#"{"severity":"Critical","priority":"High","aiReasoning":"db down","potentialFix":"restart db"}"#,
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.ai_reasoning, "db down");
        assert_eq!(result.potential_fix, "restart db");
    }

    #[test]
    fn test_parse_fenced_reply_with_snake_case() {
        let reply = "Here you go:\n```json\n{\"severity\": \"medium\", \"priority\": \"low\", \"ai_reasoning\": \"retry storm\", \"potential_fix\": \"add backoff\"}\n```";
        let result = parse_analysis(reply).unwrap();
        assert_eq!(result.severity, Severity::Medium);
        assert_eq!(result.priority, Priority::Low);
    }

    #[test]
    fn test_missing_field_is_invalid() {
        let err = parse_analysis(r#"{"severity":"High","priority":"High","aiReasoning":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(ref m) if m.contains("potentialFix")));
    }

    #[test]
    fn test_unknown_label_is_invalid() {
        let err = parse_analysis(
            r#"{"severity":"Catastrophic","priority":"High","aiReasoning":"x","potentialFix":"y"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(ref m) if m.contains("Catastrophic")));
    }

    #[test]
    fn test_non_json_is_invalid() {
        assert!(parse_analysis("I cannot help with that.").is_err());
        assert!(parse_analysis("} backwards {").is_err());
    }
}
