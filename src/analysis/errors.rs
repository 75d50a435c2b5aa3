//! Error taxonomy for the analysis pipeline.
//!
//! Every failure point (config, connection, parse, validation, tool) is
//! classified into a small, stable set of kinds. Each kind carries a
//! user-facing message and a recoverability flag so the orchestrator can
//! decide between a degraded fallback and a terminal error result.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::inference::errors::InferenceError;
use crate::tools::errors::ToolError;

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// Stable classification of an [`AnalysisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Connection,
    Parse,
    Validation,
    ToolExecution,
    Cancelled,
}

/// Sub-classification of provider connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    AuthFailed,
    RateLimited,
    QuotaExhausted,
    ModelNotFound,
    Network,
    Timeout,
    ServerError,
    Unknown,
}

impl ConnectionErrorKind {
    /// Classify a transport error by substring matching on its text.
    ///
    /// Order matters: quota errors are reported by some providers with a 429
    /// status, so quota is checked before rate limiting.
    pub fn classify(error_text: &str) -> Self {
        let lower = error_text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["quota", "insufficient_quota", "billing", "credit balance"]) {
            Self::QuotaExhausted
        } else if has(&[
            "http 401",
            "http 403",
            "unauthorized",
            "invalid api key",
            "invalid_api_key",
            "incorrect api key",
            "api key not valid",
            "authentication",
            "permission denied",
        ]) {
            Self::AuthFailed
        } else if has(&["http 429", "rate limit", "rate_limit", "too many requests"]) {
            Self::RateLimited
        } else if has(&[
            "http 404",
            "model not found",
            "model_not_found",
            "does not exist",
            "not_found_error",
        ]) {
            Self::ModelNotFound
        } else if has(&["timeout", "timed out"]) {
            Self::Timeout
        } else if has(&[
            "http 500",
            "http 502",
            "http 503",
            "http 504",
            "http 529",
            "server error",
            "overloaded",
            "service unavailable",
        ]) {
            Self::ServerError
        } else if has(&["connection", "network", "dns", "connect", "unreachable"]) {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    /// Short user-facing message for this failure.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::AuthFailed => "API key invalid or not authorized for this model",
            Self::RateLimited => "rate limited by the provider, retry later",
            Self::QuotaExhausted => "API quota exhausted, check your plan and billing",
            Self::ModelNotFound => "model not found, check the model name",
            Self::Network => "network error, check your connection",
            Self::Timeout => "the model provider timed out, retry later",
            Self::ServerError => "the model provider is having problems, retry later",
            Self::Unknown => "failed to reach the model provider",
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AuthFailed => "auth_failed",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ModelNotFound => "model_not_found",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

// ─── AnalysisError ───────────────────────────────────────────────────────────

/// Errors that can occur anywhere in the analysis pipeline.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    /// Bad provider, model, key, temperature, or request. Raised before any
    /// network call.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// The model provider could not be reached or rejected the call.
    #[error("connection error ({kind}): {detail}")]
    ConnectionError {
        kind: ConnectionErrorKind,
        detail: String,
    },

    /// Model text is not valid or recoverable JSON.
    #[error("parse error: {reason}")]
    ParseError { reason: String },

    /// JSON is well-formed but a field fails coercion.
    #[error("validation error on '{field}': {reason}")]
    ValidationError { field: String, reason: String },

    /// An individual tool invocation failed.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecutionError { tool: String, reason: String },

    /// The caller cancelled the analysis.
    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Build a connection error from raw transport text, classifying it.
    pub fn connection(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        AnalysisError::ConnectionError {
            kind: ConnectionErrorKind::classify(&detail),
            detail,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        AnalysisError::ConfigError {
            reason: reason.into(),
        }
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        AnalysisError::ValidationError {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::ConfigError { .. } => ErrorKind::Config,
            AnalysisError::ConnectionError { .. } => ErrorKind::Connection,
            AnalysisError::ParseError { .. } => ErrorKind::Parse,
            AnalysisError::ValidationError { .. } => ErrorKind::Validation,
            AnalysisError::ToolExecutionError { .. } => ErrorKind::ToolExecution,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the pipeline can keep going after this error.
    ///
    /// Tool failures are folded back into the conversation; parse and
    /// validation failures resolve to a fallback verdict. Config, connection
    /// and cancellation end the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ParseError { .. }
                | AnalysisError::ValidationError { .. }
                | AnalysisError::ToolExecutionError { .. }
        )
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::ConfigError { reason } => format!("Configuration problem: {reason}"),
            AnalysisError::ConnectionError { kind, .. } => {
                let msg = kind.user_message();
                let mut chars = msg.chars();
                match chars.next() {
                    Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
                    None => String::new(),
                }
            }
            AnalysisError::ParseError { .. } => {
                "The model response was not in the expected format".to_string()
            }
            AnalysisError::ValidationError { field, .. } => {
                format!("The model response had an invalid '{field}' field")
            }
            AnalysisError::ToolExecutionError { tool, .. } => {
                format!("The '{tool}' check could not be completed")
            }
            AnalysisError::Cancelled => "The analysis was cancelled".to_string(),
        }
    }
}

impl From<InferenceError> for AnalysisError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::ConfigError { reason } => AnalysisError::ConfigError { reason },
            InferenceError::Timeout { .. } => AnalysisError::ConnectionError {
                kind: ConnectionErrorKind::Timeout,
                detail: e.to_string(),
            },
            other => AnalysisError::connection(other.to_string()),
        }
    }
}

impl From<ToolError> for AnalysisError {
    fn from(e: ToolError) -> Self {
        AnalysisError::ToolExecutionError {
            tool: e.tool_name().to_string(),
            reason: e.to_string(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
