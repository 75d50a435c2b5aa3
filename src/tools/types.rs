//! Shared types for the analysis tools.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ToolError;

// ─── ToolName ────────────────────────────────────────────────────────────────

/// Every tool the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    UrlAnalyzer,
    DomainChecker,
    HeaderAnalyzer,
    AttachmentScanner,
    WebSearch,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::UrlAnalyzer,
        ToolName::DomainChecker,
        ToolName::HeaderAnalyzer,
        ToolName::AttachmentScanner,
        ToolName::WebSearch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::UrlAnalyzer => "url_analyzer",
            ToolName::DomainChecker => "domain_checker",
            ToolName::HeaderAnalyzer => "header_analyzer",
            ToolName::AttachmentScanner => "attachment_scanner",
            ToolName::WebSearch => "web_search",
        }
    }

    /// Whether the tool runs without any network access.
    pub fn is_offline(self) -> bool {
        !matches!(self, ToolName::WebSearch)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == trimmed)
            .ok_or_else(|| ToolError::UnknownTool {
                name: trimmed.to_string(),
            })
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Per-tool configuration supplied by the caller.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("settings", &self.settings)
            .finish()
    }
}

/// Which tools a request may use, and their configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSettings {
    #[serde(default)]
    pub enabled_tools: HashSet<ToolName>,
    #[serde(default)]
    pub per_tool_config: HashMap<ToolName, ToolConfig>,
}

impl ToolSettings {
    /// Every tool that needs no network access.
    pub fn all_offline() -> Self {
        Self {
            enabled_tools: ToolName::ALL.into_iter().filter(|t| t.is_offline()).collect(),
            per_tool_config: HashMap::new(),
        }
    }

    /// Enable a tool, returning `self` for chaining.
    pub fn enable(mut self, tool: ToolName) -> Self {
        self.enabled_tools.insert(tool);
        self
    }

    /// Attach configuration to a tool (and enable it).
    pub fn with_config(mut self, tool: ToolName, config: ToolConfig) -> Self {
        self.enabled_tools.insert(tool);
        self.per_tool_config.insert(tool, config);
        self
    }

    pub fn is_enabled(&self, tool: ToolName) -> bool {
        self.enabled_tools.contains(&tool)
    }

    pub fn context_for(&self, tool: ToolName) -> ToolContext<'_> {
        ToolContext {
            config: self.per_tool_config.get(&tool),
        }
    }
}

// ─── Tool trait ──────────────────────────────────────────────────────────────

/// Per-invocation view of a tool's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolContext<'a> {
    pub config: Option<&'a ToolConfig>,
}

impl<'a> ToolContext<'a> {
    pub fn api_key(&self) -> Option<&'a str> {
        self.config
            .and_then(|c| c.api_key.as_deref())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn setting(&self, key: &str) -> Option<&'a Value> {
        self.config
            .and_then(|c| c.settings.as_ref())
            .and_then(|s| s.get(key))
    }
}

/// A deterministic analysis capability the model can call.
///
/// Implementations must be stateless and return a best-effort structured
/// result for malformed input rather than an error. The result object always
/// carries `riskLevel`, `suspiciousFeatures` and `analysis`.
#[async_trait]
pub trait AnalysisTool: Send + Sync {
    fn name(&self) -> ToolName;

    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, args: &Value, ctx: ToolContext<'_>) -> Result<Value, ToolError>;
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Result of one tool call execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    /// The tool output, or `{error: true, message}` on failure.
    pub result: Value,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    /// Text fed back to the model as the tool message.
    pub fn to_observation(&self) -> String {
        self.result.to_string()
    }
}

/// Build the `{error: true, message}` payload used for failed tools.
pub fn error_payload(message: impl Into<String>) -> Value {
    serde_json::json!({
        "error": true,
        "message": message.into(),
    })
}

// ─── Argument helpers ────────────────────────────────────────────────────────

/// Read `key` as a list of strings.
///
/// Accepts an array (non-string entries are skipped) or a single string,
/// which is split on newlines and commas.
pub(crate) fn string_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(['\n', ','])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Read `key` as a trimmed, non-empty string.
pub(crate) fn string_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
