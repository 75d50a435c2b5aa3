//! Result validator: turns raw model text into a schema-valid verdict.
//!
//! Parsing is layered, each layer tried only if the previous one fails:
//! 1. Strict JSON parse of the whole text
//! 2. First balanced `{...}` block in the text
//! 3. Markdown fences and surrounding prose stripped, light JSON repair
//!
//! Once an object is found, every field is coerced by the rules below.
//! [`parse_analysis`] never fails: anything unrecoverable resolves to
//! [`AnalysisResult::conservative_fallback`].

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::errors::AnalysisError;
use super::types::{
    now_timestamp, AnalysisResult, RiskLevel, MAX_EXPLANATION_CHARS, MAX_SUSPICIOUS_POINTS,
    NO_SUSPICIOUS_POINTS,
};

// ─── Entry Points ────────────────────────────────────────────────────────────

/// Parse model text into a verdict, falling back instead of failing.
///
/// An unrecognized `riskLevel` is defaulted to `medium` here; every other
/// validation failure produces a fallback result with `is_error = true`.
pub fn parse_analysis(raw: &str) -> AnalysisResult {
    let value = match parse_json_object(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, raw_len = raw.len(), "model output is not parseable JSON");
            return AnalysisResult::conservative_fallback(&e);
        }
    };

    match build_result(&value, RiskPolicy::DefaultMedium) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "model output failed validation");
            AnalysisResult::conservative_fallback(&e)
        }
    }
}

/// Strictly validate an already-parsed JSON object.
///
/// Unlike [`parse_analysis`], an unrecognized `riskLevel` is an error.
pub fn validate_value(value: &Value) -> Result<AnalysisResult, AnalysisError> {
    build_result(value, RiskPolicy::Strict)
}

/// Extract a JSON object from model text using the layered strategy.
pub fn parse_json_object(raw: &str) -> Result<Value, AnalysisError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::ParseError {
            reason: "empty model response".into(),
        });
    }

    // Layer 1: strict
    if let Some(v) = parse_object(trimmed) {
        return Ok(v);
    }

    // Layer 2: first balanced block
    if let Some(block) = first_balanced_object(trimmed) {
        if let Some(v) = parse_object(block) {
            return Ok(v);
        }
    }

    // Layer 3: strip fences and prose, then repair
    let stripped = strip_fences_and_prose(trimmed);
    if let Some(v) = parse_object(stripped) {
        return Ok(v);
    }
    if let Some(v) = repair_json(stripped) {
        if v.is_object() {
            return Ok(v);
        }
    }

    Err(AnalysisError::ParseError {
        reason: "no JSON object found in model response".into(),
    })
}

// ─── Layers ──────────────────────────────────────────────────────────────────

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

/// Find the first `{...}` block whose braces balance, ignoring braces that
/// appear inside JSON string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape_next = false;

        for (i, ch) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape_next = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + i];
                        if serde_json::from_str::<Value>(candidate).is_ok() {
                            return Some(candidate);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").expect("fence regex is valid")
    })
}

/// Remove Markdown code fences and any prose around the outermost braces.
fn strip_fences_and_prose(text: &str) -> &str {
    let inner = fence_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if end > start => &inner[start..=end],
        (Some(start), _) => &inner[start..],
        _ => inner.trim(),
    }
}

/// Repair common model JSON malformations: trailing commas, stray control
/// characters and missing closing braces.
pub(crate) fn repair_json(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let mut repaired = repair_trailing_commas(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repaired
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect();
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = close_unbalanced_braces(&repaired);
    serde_json::from_str::<Value>(&repaired).ok()
}

fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        result.push(chars[i]);
        i += 1;
    }

    result
}

fn close_unbalanced_braces(input: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    let mut result = input.to_string();
    for _ in 0..depth.max(0) {
        result.push('}');
    }
    result
}

// ─── Field Coercion ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RiskPolicy {
    Strict,
    DefaultMedium,
}

fn build_result(value: &Value, policy: RiskPolicy) -> Result<AnalysisResult, AnalysisError> {
    let obj = value
        .as_object()
        .ok_or_else(|| AnalysisError::ParseError {
            reason: "model response JSON is not an object".into(),
        })?;

    let is_phishing = coerce_is_phishing(
        field(obj, &["isPhishing", "is_phishing"])
            .ok_or_else(|| AnalysisError::validation("isPhishing", "missing"))?,
    )?;

    let confidence_score = coerce_confidence_score(
        field(obj, &["confidenceScore", "confidence_score", "confidence"])
            .ok_or_else(|| AnalysisError::validation("confidenceScore", "missing"))?,
    )?;

    let suspicious_points =
        coerce_suspicious_points(field(obj, &["suspiciousPoints", "suspicious_points"]))?;

    let explanation = coerce_explanation(
        field(obj, &["explanation", "reason", "analysis"])
            .ok_or_else(|| AnalysisError::validation("explanation", "missing"))?,
    )?;

    let risk_level = match field(obj, &["riskLevel", "risk_level"]) {
        Some(v) => coerce_risk_level(v),
        None => Err(AnalysisError::validation("riskLevel", "missing")),
    };
    let risk_level = match (risk_level, policy) {
        (Ok(level), _) => level,
        (Err(e), RiskPolicy::DefaultMedium) => {
            tracing::debug!(error = %e, "defaulting unrecognized risk level to medium");
            RiskLevel::Medium
        }
        (Err(e), RiskPolicy::Strict) => return Err(e),
    };

    let timestamp = field(obj, &["timestamp"])
        .and_then(Value::as_str)
        .filter(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
        .map(str::to_string)
        .unwrap_or_else(now_timestamp);

    let is_error = field(obj, &["isError", "is_error"])
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let error_message = field(obj, &["errorMessage", "error_message"])
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AnalysisResult {
        is_phishing,
        confidence_score,
        suspicious_points,
        explanation,
        risk_level,
        timestamp,
        is_error,
        error_message,
    })
}

/// First non-null value among the given key aliases.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Accept a boolean or a string synonym (`true/yes/是`, `false/no/否`).
pub fn coerce_is_phishing(value: &Value) -> Result<bool, AnalysisError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "是" => Ok(true),
            "false" | "no" | "否" => Ok(false),
            other => Err(AnalysisError::validation(
                "isPhishing",
                format!("unrecognized value '{other}'"),
            )),
        },
        other => Err(AnalysisError::validation(
            "isPhishing",
            format!("expected boolean, got {other}"),
        )),
    }
}

/// Coerce to a number, clamp to [0, 100] and round to the nearest integer.
pub fn coerce_confidence_score(value: &Value) -> Result<u8, AnalysisError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n.clamp(0.0, 100.0).round() as u8),
        _ => Err(AnalysisError::validation(
            "confidenceScore",
            format!("not a number: {value}"),
        )),
    }
}

/// Accept an array of strings or a newline-separated string; trim, drop
/// empties, cap the count and substitute the sentinel when nothing remains.
pub fn coerce_suspicious_points(value: Option<&Value>) -> Result<Vec<String>, AnalysisError> {
    let raw: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.lines().map(strip_bullet).collect(),
        Some(other) => {
            return Err(AnalysisError::validation(
                "suspiciousPoints",
                format!("expected array or string, got {other}"),
            ))
        }
    };

    let mut points: Vec<String> = raw
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(MAX_SUSPICIOUS_POINTS)
        .collect();

    if points.is_empty() {
        points.push(NO_SUSPICIOUS_POINTS.to_string());
    }
    Ok(points)
}

fn strip_bullet(line: &str) -> String {
    line.trim()
        .trim_start_matches(['-', '*', '•'])
        .trim()
        .to_string()
}

/// Require a non-empty string; truncate with an ellipsis beyond the limit.
pub fn coerce_explanation(value: &Value) -> Result<String, AnalysisError> {
    let text = value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AnalysisError::validation("explanation", "must be a non-empty string"))?;

    Ok(truncate_with_ellipsis(text, MAX_EXPLANATION_CHARS))
}

/// Truncate to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Case-insensitive `low|medium|high`, then localized substring fallback.
pub fn coerce_risk_level(value: &Value) -> Result<RiskLevel, AnalysisError> {
    let text = value
        .as_str()
        .ok_or_else(|| AnalysisError::validation("riskLevel", "must be a string"))?;
    let lower = text.trim().to_lowercase();

    match lower.as_str() {
        "low" => return Ok(RiskLevel::Low),
        "medium" => return Ok(RiskLevel::Medium),
        "high" => return Ok(RiskLevel::High),
        _ => {}
    }

    if lower.contains("high") || lower.contains('高') {
        Ok(RiskLevel::High)
    } else if lower.contains("medium") || lower.contains("moderate") || lower.contains('中') {
        Ok(RiskLevel::Medium)
    } else if lower.contains("low") || lower.contains('低') {
        Ok(RiskLevel::Low)
    } else {
        Err(AnalysisError::validation(
            "riskLevel",
            format!("unrecognized value '{text}'"),
        ))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_json() -> Value {
        json!({
            "isPhishing": true,
            "confidenceScore": 87,
            "suspiciousPoints": ["sender spoofs a bank", "urgent tone"],
            "explanation": "Classic credential phishing.",
            "riskLevel": "high"
        })
    }

    #[test]
    fn confidence_score_is_clamped_and_rounded() {
        assert_eq!(coerce_confidence_score(&json!(-10)).unwrap(), 0);
        assert_eq!(coerce_confidence_score(&json!(150)).unwrap(), 100);
        assert_eq!(coerce_confidence_score(&json!("87.6")).unwrap(), 88);
        assert_eq!(coerce_confidence_score(&json!("42%")).unwrap(), 42);
        assert!(coerce_confidence_score(&json!("very sure")).is_err());
        assert!(coerce_confidence_score(&json!(null)).is_err());
    }

    #[test]
    fn risk_level_mapping() {
        assert_eq!(coerce_risk_level(&json!("low")).unwrap(), RiskLevel::Low);
        assert_eq!(coerce_risk_level(&json!("LOW")).unwrap(), RiskLevel::Low);
        assert_eq!(coerce_risk_level(&json!("低")).unwrap(), RiskLevel::Low);
        assert_eq!(coerce_risk_level(&json!("medium")).unwrap(), RiskLevel::Medium);
        assert_eq!(coerce_risk_level(&json!("高")).unwrap(), RiskLevel::High);
        assert_eq!(coerce_risk_level(&json!("高风险")).unwrap(), RiskLevel::High);
        assert!(matches!(
            coerce_risk_level(&json!("bogus")),
            Err(AnalysisError::ValidationError { .. })
        ));
    }

    #[test]
    fn is_phishing_synonyms() {
        assert!(coerce_is_phishing(&json!(true)).unwrap());
        assert!(coerce_is_phishing(&json!("yes")).unwrap());
        assert!(coerce_is_phishing(&json!("是")).unwrap());
        assert!(!coerce_is_phishing(&json!("False")).unwrap());
        assert!(!coerce_is_phishing(&json!("否")).unwrap());
        assert!(coerce_is_phishing(&json!("maybe")).is_err());
        assert!(coerce_is_phishing(&json!(1)).is_err());
    }

    #[test]
    fn suspicious_points_coercion() {
        let points = coerce_suspicious_points(Some(&json!("- link mismatch\n\n* spoofed sender")))
            .unwrap();
        assert_eq!(points, vec!["link mismatch", "spoofed sender"]);

        let many: Vec<String> = (0..15).map(|i| format!("point {i}")).collect();
        let points = coerce_suspicious_points(Some(&json!(many))).unwrap();
        assert_eq!(points.len(), MAX_SUSPICIOUS_POINTS);

        let points = coerce_suspicious_points(Some(&json!(["  ", ""]))).unwrap();
        assert_eq!(points, vec![NO_SUSPICIOUS_POINTS]);

        let points = coerce_suspicious_points(None).unwrap();
        assert_eq!(points, vec![NO_SUSPICIOUS_POINTS]);
    }

    #[test]
    fn explanation_is_truncated_with_ellipsis() {
        let long = "a".repeat(MAX_EXPLANATION_CHARS + 500);
        let text = coerce_explanation(&json!(long)).unwrap();
        assert_eq!(text.chars().count(), MAX_EXPLANATION_CHARS);
        assert!(text.ends_with("..."));

        assert!(coerce_explanation(&json!("   ")).is_err());
        assert!(coerce_explanation(&json!(42)).is_err());
    }

    #[test]
    fn strict_layer_parses_plain_json() {
        let raw = valid_json().to_string();
        let result = parse_analysis(&raw);
        assert!(result.is_phishing);
        assert_eq!(result.confidence_score, 87);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(!result.is_error);
    }

    #[test]
    fn balanced_block_layer_handles_surrounding_prose() {
        let raw = format!(
            "Here is my verdict: {} Let me know if you need more.",
            valid_json()
        );
        let result = parse_analysis(&raw);
        assert!(!result.is_error);
        assert_eq!(result.suspicious_points.len(), 2);
    }

    #[test]
    fn balanced_block_ignores_braces_inside_strings() {
        let raw = r#"Result: {"isPhishing": false, "confidenceScore": 10, "suspiciousPoints": [], "explanation": "uses {curly} text", "riskLevel": "low"}"#;
        let result = parse_analysis(raw);
        assert!(!result.is_error);
        assert_eq!(result.explanation, "uses {curly} text");
        assert_eq!(result.suspicious_points, vec![NO_SUSPICIOUS_POINTS]);
    }

    #[test]
    fn fence_layer_repairs_trailing_commas() {
        let raw = "```json\n{\"isPhishing\": \"no\", \"confidenceScore\": \"20\", \
                   \"suspiciousPoints\": [\"none\",], \"explanation\": \"Newsletter.\", \
                   \"riskLevel\": \"低\",}\n```";
        let result = parse_analysis(raw);
        assert!(!result.is_error, "fenced JSON with trailing commas should parse");
        assert!(!result.is_phishing);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn plain_prose_yields_fallback() {
        let result = parse_analysis("I think this email is probably fine, nothing to worry about.");
        assert!(result.is_error);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(!result.explanation.is_empty());
        assert!(result.is_phishing);
        assert_eq!(result.confidence_score, 50);
    }

    #[test]
    fn empty_output_yields_fallback() {
        let result = parse_analysis("   ");
        assert!(result.is_error);
    }

    #[test]
    fn unknown_risk_level_defaults_to_medium_at_boundary() {
        let mut value = valid_json();
        value["riskLevel"] = json!("bogus");
        let result = parse_analysis(&value.to_string());
        assert!(!result.is_error);
        assert_eq!(result.risk_level, RiskLevel::Medium);

        assert!(validate_value(&value).is_err(), "strict validation surfaces it");
    }

    #[test]
    fn field_failure_yields_error_fallback() {
        let mut value = valid_json();
        value["confidenceScore"] = json!("certain");
        let result = parse_analysis(&value.to_string());
        assert!(result.is_error);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("confidenceScore"));
    }

    #[test]
    fn snake_case_keys_are_accepted() {
        let raw = r#"{"is_phishing": true, "confidence_score": 70, "suspicious_points": "odd link", "explanation": "x", "risk_level": "medium"}"#;
        let result = parse_analysis(raw);
        assert!(!result.is_error);
        assert_eq!(result.suspicious_points, vec!["odd link"]);
    }

    #[test]
    fn validation_is_idempotent_on_valid_results() {
        let original = parse_analysis(&valid_json().to_string());
        let serialized = serde_json::to_string(&original).unwrap();
        let reparsed = parse_analysis(&serialized);
        assert_eq!(original, reparsed);

        let fallback = parse_analysis("no json here");
        let reparsed = parse_analysis(&serde_json::to_string(&fallback).unwrap());
        assert_eq!(fallback, reparsed);
    }
}
