//! Chat model handles.
//!
//! `ChatModel` is the single capability the orchestrator needs from a
//! provider. `HttpChatModel` implements it over reqwest for every supported
//! provider; tests substitute scripted stubs. Every orchestrator call goes
//! through [`invoke_with_retry`], which owns the per-call timeout and the
//! transient-failure retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{validate_config, AnalyzerSettings, ModelConfig};
use super::errors::InferenceError;
use super::providers::{build_request, parse_response};
use super::types::{ChatMessage, ModelResponse, ToolChoice, ToolDefinition};
use crate::analysis::errors::AnalysisError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// A configured model that can answer a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation, optionally offering tools.
    ///
    /// With `ToolChoice::Never` the definitions are still sent but the
    /// model must answer in text.
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        choice: ToolChoice,
    ) -> Result<ModelResponse, InferenceError>;

    /// Whether this handle can be offered tools at all.
    fn supports_tool_calling(&self) -> bool {
        true
    }

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

// ─── HttpChatModel ───────────────────────────────────────────────────────────

/// HTTP-backed model handle for OpenAI, Anthropic and Google.
///
/// Construction never touches the network; authentication problems surface
/// on the first `invoke`.
pub struct HttpChatModel {
    http: HttpClient,
    config: ModelConfig,
    base_url: String,
    max_output_tokens: u32,
    request_timeout: Duration,
}

impl HttpChatModel {
    pub fn new(config: ModelConfig, settings: &AnalyzerSettings) -> Result<Self, InferenceError> {
        let base_url = settings.endpoints.base_url(config.provider).to_string();

        // The overall deadline is enforced by `invoke_with_retry`; the
        // client-level timeout is a backstop for callers that bypass it.
        let request_timeout = Duration::from_secs(settings.model_timeout_secs.max(1) * 2);
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            base_url,
            max_output_tokens: settings.max_output_tokens,
            request_timeout,
        })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        choice: ToolChoice,
    ) -> Result<ModelResponse, InferenceError> {
        let request = build_request(
            &self.config,
            &self.base_url,
            self.max_output_tokens,
            messages,
            tools,
            choice,
        );

        // Log the request metadata (not the body: it carries the email)
        tracing::debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            message_count = messages.len(),
            tool_count = tools.map(|t| t.len()).unwrap_or(0),
            ?choice,
            "model request"
        );

        let mut builder = self.http.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                let limit = if e.is_connect() {
                    CONNECT_TIMEOUT
                } else {
                    self.request_timeout
                };
                InferenceError::Timeout {
                    duration_secs: limit.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: self.base_url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: self.base_url.clone(),
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_response(self.config.provider, &body_text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Validate `config` and build a model handle for it.
///
/// Fails with `ConfigError` only; no network I/O happens here.
pub fn create_model(
    config: &ModelConfig,
    settings: &AnalyzerSettings,
) -> Result<Box<dyn ChatModel>, AnalysisError> {
    let validation = validate_config(config);
    if !validation.valid {
        return Err(AnalysisError::config(
            validation
                .reason
                .unwrap_or_else(|| "invalid model configuration".to_string()),
        ));
    }

    let model = HttpChatModel::new(config.clone(), settings)?;
    tracing::info!(
        provider = %config.provider,
        model = %config.model,
        "model handle created"
    );
    Ok(Box::new(model))
}

// ─── Retry ───────────────────────────────────────────────────────────────────

/// Timeout and retry policy for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &AnalyzerSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.model_timeout_secs),
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }

    /// Backoff before retry number `attempt` (1-based): base, 2×base, 4×base…
    /// capped at [`MAX_BACKOFF`].
    fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&AnalyzerSettings::default())
    }
}

/// Invoke `model` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`. Transient failures
/// (timeouts, connect failures, 5xx) are retried up to `max_retries` times
/// with exponential backoff; anything else is returned immediately.
pub async fn invoke_with_retry(
    model: &dyn ChatModel,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    choice: ToolChoice,
    policy: &RetryPolicy,
) -> Result<ModelResponse, InferenceError> {
    let mut attempt = 0u32;
    loop {
        let call = model.invoke(messages, tools, choice);
        let outcome = match tokio::time::timeout(policy.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                duration_secs: policy.timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    model = %model.model_name(),
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient model failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
