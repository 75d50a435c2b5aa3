//! Tool error types.

use thiserror::Error;

/// Errors that can occur while looking up or running an analysis tool.
///
/// None of these abort an analysis: the registry folds them into an
/// `{error: true, message}` observation for the model.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model asked for a tool that does not exist.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// The tool exists but is not enabled for this request.
    #[error("tool '{tool}' is not enabled for this analysis")]
    NotEnabled { tool: String },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The tool ran and failed.
    #[error("tool '{tool}' failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },
}

impl ToolError {
    /// Name of the tool this error is about.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::UnknownTool { name } => name,
            ToolError::NotEnabled { tool }
            | ToolError::InvalidArguments { tool, .. }
            | ToolError::ExecutionFailed { tool, .. } => tool,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::errors::{AnalysisError, ErrorKind};

    #[test]
    fn tool_name_for_every_variant() {
        let errors = [
            ToolError::UnknownTool {
                name: "ping".into(),
            },
            ToolError::NotEnabled {
                tool: "ping".into(),
            },
            ToolError::InvalidArguments {
                tool: "ping".into(),
                reason: "missing host".into(),
            },
            ToolError::ExecutionFailed {
                tool: "ping".into(),
                reason: "boom".into(),
            },
        ];
        for e in errors {
            assert_eq!(e.tool_name(), "ping");
        }
    }

    #[test]
    fn maps_to_recoverable_tool_execution_error() {
        let err: AnalysisError = ToolError::InvalidArguments {
            tool: "url_analyzer".into(),
            reason: "missing required field: 'urls'".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("url_analyzer"));
    }
}
