//! Tool registry: the fixed set of analysis tools, keyed by [`ToolName`].
//!
//! Provides:
//! - Lookup by name (an exhaustive match, so every `ToolName` has a tool)
//! - Tool definitions for the model, filtered by the request's enabled set
//! - Validation that a tool call carries the schema's required fields
//! - Execution that folds every failure into an `{error: true, message}`
//!   observation

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::attachment_scanner::AttachmentScanner;
use super::domain_checker::DomainChecker;
use super::errors::ToolError;
use super::header_analyzer::HeaderAnalyzer;
use super::types::{error_payload, AnalysisTool, ToolCallResult, ToolName, ToolSettings};
use super::url_analyzer::UrlAnalyzer;
use super::web_search::{HttpSearchProvider, SearchProvider, WebSearchTool};
use crate::inference::config::AnalyzerSettings;
use crate::inference::types::{ToolCall, ToolDefinition};

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Immutable registry of every analysis tool.
///
/// Holds no per-request state, so one instance is shared (via `Arc`) by any
/// number of concurrent analyses.
pub struct ToolRegistry {
    url_analyzer: UrlAnalyzer,
    domain_checker: DomainChecker,
    header_analyzer: HeaderAnalyzer,
    attachment_scanner: AttachmentScanner,
    web_search: WebSearchTool,
}

impl ToolRegistry {
    /// Registry whose web search uses `search_provider`.
    pub fn new(search_provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            url_analyzer: UrlAnalyzer,
            domain_checker: DomainChecker,
            header_analyzer: HeaderAnalyzer,
            attachment_scanner: AttachmentScanner,
            web_search: WebSearchTool::new(search_provider),
        }
    }

    /// Registry whose web search talks to `settings.search_endpoint`.
    pub fn from_settings(settings: &AnalyzerSettings) -> Result<Self, ToolError> {
        let provider = HttpSearchProvider::new(settings.search_endpoint.clone()).map_err(|e| {
            ToolError::ExecutionFailed {
                tool: ToolName::WebSearch.to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        Ok(Self::new(Arc::new(provider)))
    }

    /// Look up a tool.
    pub fn get(&self, name: ToolName) -> &dyn AnalysisTool {
        match name {
            ToolName::UrlAnalyzer => &self.url_analyzer,
            ToolName::DomainChecker => &self.domain_checker,
            ToolName::HeaderAnalyzer => &self.header_analyzer,
            ToolName::AttachmentScanner => &self.attachment_scanner,
            ToolName::WebSearch => &self.web_search,
        }
    }

    /// Definitions for the enabled tools, in a stable order.
    pub fn definitions(&self, settings: &ToolSettings) -> Vec<ToolDefinition> {
        ToolName::ALL
            .into_iter()
            .filter(|t| settings.is_enabled(*t))
            .map(|t| {
                let tool = self.get(t);
                ToolDefinition {
                    name: t.to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                }
            })
            .collect()
    }

    /// Validate a tool call: tool exists, is enabled, and has every required
    /// argument.
    ///
    /// This is a structural check only (required top-level fields present).
    /// The tools themselves tolerate oddly-typed values.
    pub fn validate_call(
        &self,
        name: &str,
        arguments: &Value,
        settings: &ToolSettings,
    ) -> Result<ToolName, ToolError> {
        let tool: ToolName = name.parse()?;
        if !settings.is_enabled(tool) {
            return Err(ToolError::NotEnabled {
                tool: tool.to_string(),
            });
        }

        let schema = self.get(tool).parameters_schema();
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            let args_obj = arguments.as_object();
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj
                    .map(|obj| obj.get(field_name).is_some_and(|v| !v.is_null()))
                    .unwrap_or(false);
                if !has_field {
                    return Err(ToolError::InvalidArguments {
                        tool: tool.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(tool)
    }

    /// Execute one tool call.
    ///
    /// Never fails: unknown tools, invalid arguments and tool errors come
    /// back as a result with `success = false` and an error payload.
    pub async fn execute(&self, call: &ToolCall, settings: &ToolSettings) -> ToolCallResult {
        let start = Instant::now();

        let outcome = match self.validate_call(&call.name, &call.arguments, settings) {
            Ok(tool) => {
                self.get(tool)
                    .invoke(&call.arguments, settings.context_for(tool))
                    .await
            }
            Err(e) => Err(e),
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                // Tools report soft failures (e.g. search transport errors)
                // in-band with `error: true`.
                let soft_error = result.get("error").and_then(Value::as_bool) == Some(true);
                let error = soft_error.then(|| {
                    result
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("tool reported an error")
                        .to_string()
                });
                let risk = result
                    .get("riskLevel")
                    .and_then(Value::as_str)
                    .unwrap_or("n/a");
                tracing::info!(
                    tool = %call.name,
                    success = !soft_error,
                    duration_ms = execution_time_ms,
                    risk,
                    "tool executed"
                );
                ToolCallResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    success: !soft_error,
                    result,
                    error,
                    execution_time_ms,
                }
            }
            Err(e) => {
                tracing::warn!(
                    tool = %call.name,
                    error = %e,
                    duration_ms = execution_time_ms,
                    "tool call failed"
                );
                let message = e.to_string();
                ToolCallResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    success: false,
                    result: error_payload(message.clone()),
                    error: Some(message),
                    execution_time_ms,
                }
            }
        }
    }

    /// Execute calls sequentially, in request order.
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        settings: &ToolSettings,
    ) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call, settings).await);
        }
        results
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
