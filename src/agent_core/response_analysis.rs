//! Response analysis for the analysis loop.
//!
//! Classifies assistant text: whether it carries a completion marker, and
//! whether it already holds a usable verdict that can stand in for a final
//! answer when a later model call fails.

use serde_json::Value;

use crate::analysis::validator::parse_json_object;

/// Literal markers some prompts ask the model to emit when it is done
/// calling tools.
const COMPLETION_MARKERS: &[&str] = &["ANALYSIS_COMPLETE", "分析完成"];

/// Keys that identify a verdict object.
const VERDICT_KEYS: &[&str] = &["isPhishing", "is_phishing"];

/// Detect a completion marker in free-form model text.
///
/// Only consulted when `AnalyzerSettings::honor_completion_marker` is set.
/// The check is case-sensitive: the marker is a sentinel, not prose.
pub fn has_completion_marker(text: &str) -> bool {
    COMPLETION_MARKERS.iter().any(|m| text.contains(m))
}

/// Whether `text` contains a JSON object that looks like a verdict.
///
/// Used to pick a degraded answer from the ledger. The object is not
/// validated here; [`crate::analysis::validator::parse_analysis`] does that.
pub fn contains_verdict(text: &str) -> bool {
    match parse_json_object(text) {
        Ok(Value::Object(map)) => VERDICT_KEYS.iter().any(|k| map.contains_key(*k)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_detected() {
        assert!(has_completion_marker("Evidence gathered. ANALYSIS_COMPLETE"));
        assert!(has_completion_marker("证据充分，分析完成。"));
    }

    #[test]
    fn marker_is_case_sensitive() {
        assert!(!has_completion_marker("analysis complete, here is my verdict"));
        assert!(!has_completion_marker(""));
    }

    #[test]
    fn verdict_in_fenced_json() {
        let text = "Here is the verdict:\n```json\n{\"isPhishing\": true, \"confidenceScore\": 90}\n```";
        assert!(contains_verdict(text));
    }

    #[test]
    fn verdict_with_snake_case_key() {
        assert!(contains_verdict(r#"{"is_phishing": false}"#));
    }

    #[test]
    fn non_verdict_json_is_rejected() {
        assert!(!contains_verdict(r#"{"urls": ["https://example.com"]}"#));
    }

    #[test]
    fn prose_is_not_a_verdict() {
        assert!(!contains_verdict("Let me check the links first."));
    }
}
