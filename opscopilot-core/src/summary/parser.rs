//! Turns raw backend text into a [`StructuredResult`].
//!
//! Parsing never fails: malformed output degrades to a low-confidence
//! default result instead of an error.

use serde_json::Value;

use crate::types::{RiskLevel, StructuredResult};

const FALLBACK_SUMMARY: &str = "Unable to parse AI response. Review the ticket manually.";
const FALLBACK_STEP: &str = "Review the ticket details and confirm the scope.";
const MISSING_SUMMARY: &str = "Unable to generate the summary.";
const MISSING_STEP: &str = "Review the ticket details.";
const DEFAULT_CATEGORY: &str = "task";

/// Parse backend output, substituting defaults for anything missing or mistyped.
pub fn parse_result(raw: &str) -> StructuredResult {
    let Some(span) = extract_json_object(raw) else {
        tracing::debug!(len = raw.len(), "No JSON object in backend output");
        return fallback_result();
    };

    let parsed: Value = match serde_json::from_str(span) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Backend output JSON did not decode");
            return fallback_result();
        }
    };

    let summary = parsed
        .get("summary")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| MISSING_SUMMARY.to_string());

    let next_steps = string_array(&parsed, "nextSteps")
        .filter(|steps| !steps.is_empty())
        .unwrap_or_else(|| vec![MISSING_STEP.to_string()]);

    let risk_level = parsed
        .get("riskLevel")
        .and_then(Value::as_str)
        .and_then(RiskLevel::parse)
        .unwrap_or(RiskLevel::Medium);

    let categories = string_array(&parsed, "categories")
        .unwrap_or_else(|| vec![DEFAULT_CATEGORY.to_string()]);

    StructuredResult {
        summary,
        next_steps,
        risk_level,
        categories,
    }
}

/// The all-defaults result returned when no usable JSON is found.
pub fn fallback_result() -> StructuredResult {
    StructuredResult {
        summary: FALLBACK_SUMMARY.to_string(),
        next_steps: vec![FALLBACK_STEP.to_string()],
        risk_level: RiskLevel::Medium,
        categories: vec![DEFAULT_CATEGORY.to_string()],
    }
}

/// Span from the first `{` to the last `}`; tolerates prose and code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

/// String elements of an array field; non-string elements are dropped.
fn string_array(value: &Value, key: &str) -> Option<Vec<String>> {
    value.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect()
    })
}
