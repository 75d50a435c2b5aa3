//! Model gateway: provider configuration and chat model handles.
//!
//! This module handles all communication with the model providers:
//! - Model configuration validation and analyzer settings loading
//! - OpenAI, Anthropic and Gemini wire formats
//! - Per-call timeout and transient-failure retry
//!
//! The orchestrator only sees the [`ChatModel`] trait, so switching provider
//! is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod providers;
pub mod types;

// Re-exports for convenience
pub use client::{create_model, invoke_with_retry, ChatModel, HttpChatModel, RetryPolicy};
pub use config::{
    load_settings, parse_settings, validate_config, validate_settings, AnalyzerSettings,
    ConfigValidation, ModelConfig, Provider, ProviderEndpoints,
};
pub use errors::InferenceError;
pub use types::{ChatMessage, ModelResponse, Role, ToolCall, ToolChoice, ToolDefinition};
