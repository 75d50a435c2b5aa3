//! Request and verdict types shared across the analysis pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::AnalysisError;
use crate::inference::config::ModelConfig;
use crate::tools::types::ToolSettings;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Sentinel entry used when no suspicious points were reported.
pub const NO_SUSPICIOUS_POINTS: &str = "no suspicious points found";

/// Maximum number of suspicious points kept in a verdict.
pub const MAX_SUSPICIOUS_POINTS: usize = 10;

/// Maximum explanation length in characters (an ellipsis is appended beyond).
pub const MAX_EXPLANATION_CHARS: usize = 2_000;

// ─── RiskLevel ───────────────────────────────────────────────────────────────

/// Three-level risk scale used by verdicts and tool assessments.
///
/// Ordered so that `max()` over a set of assessments yields the worst one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Map a flag count onto the scale: more than `high_above` flags is high,
    /// any flag at all is medium, none is low.
    pub fn from_flag_count(flags: usize, high_above: usize) -> Self {
        if flags > high_above {
            RiskLevel::High
        } else if flags > 0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── AnalysisRequest ─────────────────────────────────────────────────────────

/// One analysis call: the email, the model to ask, and the tool policy.
///
/// Read-only for the lifetime of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub email_content: String,
    pub model_config: ModelConfig,
    #[serde(default)]
    pub use_tools: bool,
    #[serde(default)]
    pub tool_settings: ToolSettings,
}

impl AnalysisRequest {
    /// A request with tools disabled.
    pub fn new(email_content: impl Into<String>, model_config: ModelConfig) -> Self {
        Self {
            email_content: email_content.into(),
            model_config,
            use_tools: false,
            tool_settings: ToolSettings::default(),
        }
    }

    /// Enable tool calling with the given settings.
    pub fn with_tools(mut self, tool_settings: ToolSettings) -> Self {
        self.use_tools = true;
        self.tool_settings = tool_settings;
        self
    }

    /// Whether the model may request tools for this request.
    pub fn tools_enabled(&self) -> bool {
        self.use_tools && !self.tool_settings.enabled_tools.is_empty()
    }

    /// Check the request shape before any model call.
    pub fn validate(&self, max_email_chars: usize) -> Result<(), AnalysisError> {
        if self.email_content.trim().is_empty() {
            return Err(AnalysisError::config("email content is empty"));
        }
        let chars = self.email_content.chars().count();
        if chars > max_email_chars {
            return Err(AnalysisError::config(format!(
                "email content is {chars} characters, limit is {max_email_chars}"
            )));
        }
        Ok(())
    }
}

// ─── AnalysisResult ──────────────────────────────────────────────────────────

/// The structured phishing verdict returned to the caller.
///
/// Always fully populated, whether produced by the happy path or by one of
/// the fallback constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub is_phishing: bool,
    pub confidence_score: u8,
    pub suspicious_points: Vec<String>,
    pub explanation: String,
    pub risk_level: RiskLevel,
    pub timestamp: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AnalysisResult {
    /// Conservative verdict used when the model output cannot be turned into
    /// a valid result (parse or validation failure).
    ///
    /// Leans towards "phishing" at medium confidence so that a broken answer
    /// never reads as an all-clear.
    pub fn conservative_fallback(error: &AnalysisError) -> Self {
        Self {
            is_phishing: true,
            confidence_score: 50,
            suspicious_points: vec!["the analysis output could not be interpreted".to_string()],
            explanation: format!(
                "{}. The email could not be assessed automatically; \
                 treat it with caution and review it manually.",
                error.user_message()
            ),
            risk_level: RiskLevel::Medium,
            timestamp: now_timestamp(),
            is_error: true,
            error_message: Some(error.to_string()),
        }
    }

    /// Terminal error result for failures that produced no verdict at all
    /// (connection failures, cancellation).
    pub fn from_error(error: &AnalysisError) -> Self {
        Self {
            is_phishing: false,
            confidence_score: 0,
            suspicious_points: vec![NO_SUSPICIOUS_POINTS.to_string()],
            explanation: error.user_message(),
            risk_level: RiskLevel::Medium,
            timestamp: now_timestamp(),
            is_error: true,
            error_message: Some(error.to_string()),
        }
    }
}

/// Current time as an RFC 3339 / ISO-8601 string.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
