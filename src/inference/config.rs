//! Model and analyzer configuration.
//!
//! `ModelConfig` identifies which provider/model to ask and is validated
//! before any client is built. `AnalyzerSettings` holds the engine knobs
//! (round cap, timeouts, retries, limits, endpoints) and can be loaded from a
//! YAML file with environment-variable interpolation.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Provider ────────────────────────────────────────────────────────────────

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    /// Prefix every API key issued by this provider starts with.
    ///
    /// Advisory shape check only; it catches keys pasted into the wrong
    /// provider slot, not forged keys.
    pub fn api_key_prefix(self) -> &'static str {
        match self {
            Provider::OpenAi => "sk-",
            Provider::Anthropic => "sk-ant-",
            Provider::Google => "AIza",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(InferenceError::ConfigError {
                reason: format!("unsupported provider '{other}'"),
            }),
        }
    }
}

// ─── ModelConfig ─────────────────────────────────────────────────────────────

/// Which model to ask, and how.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub api_key: String,
}

impl ModelConfig {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        temperature: f32,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Outcome of [`validate_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ConfigValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validate a model configuration without touching the network.
pub fn validate_config(config: &ModelConfig) -> ConfigValidation {
    if config.model.trim().is_empty() {
        return ConfigValidation::invalid("model id is empty");
    }

    let key = config.api_key.trim();
    if key.is_empty() {
        return ConfigValidation::invalid(format!("{} API key is empty", config.provider));
    }
    let prefix = config.provider.api_key_prefix();
    if !key.starts_with(prefix) {
        return ConfigValidation::invalid(format!(
            "{} API keys start with '{prefix}'",
            config.provider
        ));
    }

    if !config.temperature.is_finite() || !(0.0..=2.0).contains(&config.temperature) {
        return ConfigValidation::invalid(format!(
            "temperature {} is outside [0, 2]",
            config.temperature
        ));
    }

    ConfigValidation::ok()
}

// ─── AnalyzerSettings ────────────────────────────────────────────────────────

/// Base URLs for each provider's API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    #[serde(default = "default_openai_base_url")]
    pub openai: String,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic: String,
    #[serde(default = "default_google_base_url")]
    pub google: String,
}

impl ProviderEndpoints {
    pub fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
        }
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: default_openai_base_url(),
            anthropic: default_anthropic_base_url(),
            google: default_google_base_url(),
        }
    }
}

/// Engine-wide settings for the analysis loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSettings {
    /// Hard ceiling on tool rounds; bounds a run to `round_cap + 2` model calls.
    #[serde(default = "default_round_cap")]
    pub round_cap: u32,
    /// Per-call model timeout.
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    /// Retries for transient model failures (timeouts, 5xx, connect errors).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff between retries (doubles each attempt).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_email_chars")]
    pub max_email_chars: usize,
    /// Tool results longer than this are truncated before entering the
    /// conversation.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// When `true`, the literal completion marker in model text ends the
    /// tool loop even if the model also requested tools.
    #[serde(default)]
    pub honor_completion_marker: bool,
    #[serde(default)]
    pub endpoints: ProviderEndpoints,
    /// Tavily-compatible search endpoint used by the web search tool.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,
}

fn default_round_cap() -> u32 {
    5
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_max_email_chars() -> usize {
    50_000
}
fn default_max_tool_result_chars() -> usize {
    6_000
}
fn default_max_output_tokens() -> u32 {
    2_048
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_google_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            round_cap: default_round_cap(),
            model_timeout_secs: default_model_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_email_chars: default_max_email_chars(),
            max_tool_result_chars: default_max_tool_result_chars(),
            max_output_tokens: default_max_output_tokens(),
            honor_completion_marker: false,
            endpoints: ProviderEndpoints::default(),
            search_endpoint: default_search_endpoint(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load analyzer settings from a YAML file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing. Missing keys take their defaults.
pub fn load_settings(path: &Path) -> Result<AnalyzerSettings, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_settings(&raw)
}

/// Parse analyzer settings from YAML text (with env interpolation).
pub fn parse_settings(raw: &str) -> Result<AnalyzerSettings, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    let settings: AnalyzerSettings =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse settings: {e}"),
        })?;

    validate_settings(&settings)?;
    Ok(settings)
}

/// Reject settings the loop cannot honour.
///
/// Applied to parsed files and again by `PhishingAnalyzer`, so settings
/// built in code are checked too.
pub fn validate_settings(settings: &AnalyzerSettings) -> Result<(), InferenceError> {
    if settings.round_cap == 0 {
        return Err(InferenceError::ConfigError {
            reason: "round_cap must be at least 1".into(),
        });
    }
    Ok(())
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
