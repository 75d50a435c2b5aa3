//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Display strings
//! keep the HTTP status and provider body verbatim so the analysis error
//! taxonomy can classify them by substring.

use thiserror::Error;

/// Errors that can occur while invoking a model.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the provider failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The provider did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the provider.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The provider answered 2xx but the body was not the expected shape.
    #[error("invalid provider response: {reason}")]
    InvalidResponse { reason: String },

    /// Configuration error (bad model config, client construction failure).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Only clearly transient failures qualify: timeouts, connect failures
    /// and 5xx responses. Auth, quota, rate-limit and other 4xx responses
    /// are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError {
                    status: 500..=599,
                    ..
                }
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
