//! Provider wire formats.
//!
//! Each supported provider gets a request builder and a response parser.
//! Both are pure functions over the provider-neutral types in
//! [`super::types`], so every format is testable without a network.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::config::{ModelConfig, Provider};
use super::errors::InferenceError;
use super::types::{ChatMessage, ModelResponse, Role, ToolCall, ToolChoice, ToolDefinition};
use crate::analysis::validator::repair_json;

/// `anthropic-version` header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A fully-built HTTP request for one model invocation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// Build the request for `config.provider`.
///
/// `choice` only matters when `tools` is non-empty.
pub fn build_request(
    config: &ModelConfig,
    base_url: &str,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    choice: ToolChoice,
) -> ProviderRequest {
    let base = base_url.trim_end_matches('/');
    let tools = tools.filter(|t| !t.is_empty());

    match config.provider {
        Provider::OpenAi => ProviderRequest {
            url: format!("{base}/chat/completions"),
            headers: vec![("Authorization", format!("Bearer {}", config.api_key))],
            body: openai_body(config, max_tokens, messages, tools, choice),
        },
        Provider::Anthropic => ProviderRequest {
            url: format!("{base}/v1/messages"),
            headers: vec![
                ("x-api-key", config.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: anthropic_body(config, max_tokens, messages, tools, choice),
        },
        Provider::Google => ProviderRequest {
            url: format!("{base}/v1beta/models/{}:generateContent", config.model),
            headers: vec![("x-goog-api-key", config.api_key.clone())],
            body: google_body(config, max_tokens, messages, tools, choice),
        },
    }
}

/// Parse a 2xx response body from `provider`.
pub fn parse_response(provider: Provider, body: &str) -> Result<ModelResponse, InferenceError> {
    match provider {
        Provider::OpenAi => parse_openai_response(body),
        Provider::Anthropic => parse_anthropic_response(body),
        Provider::Google => parse_google_response(body),
    }
}

fn invalid(reason: impl Into<String>) -> InferenceError {
    InferenceError::InvalidResponse {
        reason: reason.into(),
    }
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

// ─── OpenAI ──────────────────────────────────────────────────────────────────

fn openai_body(
    config: &ModelConfig,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    choice: ToolChoice,
) -> Value {
    let wire_messages: Vec<Value> = messages
        .iter()
        .map(|m| match m.role {
            Role::System => json!({"role": "system", "content": m.content}),
            Role::User => json!({"role": "user", "content": m.content}),
            Role::Assistant if !m.tool_calls.is_empty() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(m.content.clone())
                };
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            Role::Assistant => json!({"role": "assistant", "content": m.content}),
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                "content": m.content,
            }),
        })
        .collect();

    let mut body = json!({
        "model": config.model,
        "messages": wire_messages,
        "temperature": config.temperature,
        "max_tokens": max_tokens,
    });

    if let Some(tools) = tools {
        let defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(defs);
        body["tool_choice"] = match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Never => json!("none"),
        };
    }

    body
}

/// Parse an OpenAI Chat Completions response.
pub fn parse_openai_response(body: &str) -> Result<ModelResponse, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        tool_calls: Option<Vec<WireToolCall>>,
    }

    #[derive(Deserialize)]
    struct WireToolCall {
        id: Option<String>,
        function: WireFunction,
    }

    #[derive(Deserialize)]
    struct WireFunction {
        name: String,
        arguments: String,
    }

    let resp: Response = serde_json::from_str(body)
        .map_err(|e| invalid(format!("failed to parse chat completion: {e}")))?;
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| invalid("empty choices array"))?;

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        tool_calls.push(ToolCall {
            id: tc.id.unwrap_or_else(new_call_id),
            arguments: parse_tool_arguments(&tc.function.name, &tc.function.arguments)?,
            name: tc.function.name,
        });
    }

    Ok(ModelResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

/// Decode a JSON-string arguments payload, repairing common model mistakes
/// (trailing commas, unclosed braces) before giving up.
fn parse_tool_arguments(tool: &str, raw: &str) -> Result<Value, InferenceError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => Ok(v),
        Err(e) => {
            if let Some(repaired) = repair_json(raw) {
                tracing::info!(tool = %tool, "repaired malformed tool call arguments");
                return Ok(repaired);
            }
            Err(invalid(format!("tool '{tool}' arguments are not JSON: {e}")))
        }
    }
}

// ─── Anthropic ───────────────────────────────────────────────────────────────

fn anthropic_body(
    config: &ModelConfig,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    choice: ToolChoice,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut wire_messages: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => {}
            Role::User => {
                // A prompt that follows tool results joins their user turn.
                if let Some(blocks) = wire_messages
                    .last_mut()
                    .filter(|last| last["role"] == "user")
                    .and_then(|last| last["content"].as_array_mut())
                {
                    blocks.push(json!({"type": "text", "text": m.content}));
                } else {
                    wire_messages.push(json!({"role": "user", "content": m.content}));
                }
            }
            Role::Assistant if m.tool_calls.is_empty() => {
                wire_messages.push(json!({"role": "assistant", "content": m.content}))
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for tc in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                wire_messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                });
                // Results for one assistant turn share a single user turn.
                if let Some(blocks) = wire_messages
                    .last_mut()
                    .filter(|last| last["role"] == "user")
                    .and_then(|last| last["content"].as_array_mut())
                {
                    blocks.push(block);
                } else {
                    wire_messages.push(json!({"role": "user", "content": [block]}));
                }
            }
        }
    }

    // Anthropic caps temperature at 1.0.
    let mut body = json!({
        "model": config.model,
        "max_tokens": max_tokens,
        "temperature": config.temperature.min(1.0),
        "messages": wire_messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if let Some(tools) = tools {
        let defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(defs);
        if choice == ToolChoice::Never {
            body["tool_choice"] = json!({"type": "none"});
        }
    }

    body
}

/// Parse an Anthropic Messages response.
pub fn parse_anthropic_response(body: &str) -> Result<ModelResponse, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        content: Vec<Block>,
    }

    #[derive(Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Block {
        Text {
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
            #[serde(default)]
            input: Value,
        },
        #[serde(other)]
        Other,
    }

    let resp: Response = serde_json::from_str(body)
        .map_err(|e| invalid(format!("failed to parse messages response: {e}")))?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            Block::Text { text: t } => text.push(t),
            Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: if input.is_null() {
                    Value::Object(Map::new())
                } else {
                    input
                },
            }),
            Block::Other => {}
        }
    }

    Ok(ModelResponse {
        content: text.join(""),
        tool_calls,
    })
}

// ─── Google Gemini ───────────────────────────────────────────────────────────

fn google_body(
    config: &ModelConfig,
    max_tokens: u32,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    choice: ToolChoice,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut contents: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => {}
            Role::User => match contents.last_mut().filter(|last| last["role"] == "user") {
                Some(last) => {
                    if let Some(parts) = last["parts"].as_array_mut() {
                        parts.push(json!({"text": m.content}));
                    }
                }
                None => contents.push(json!({"role": "user", "parts": [{"text": m.content}]})),
            },
            Role::Assistant => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({"text": m.content}));
                }
                for tc in &m.tool_calls {
                    parts.push(json!({"functionCall": {"name": tc.name, "args": tc.arguments}}));
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Role::Tool => {
                // functionResponse.response must be an object.
                let response = match serde_json::from_str::<Value>(&m.content) {
                    Ok(v @ Value::Object(_)) => v,
                    _ => json!({"result": m.content}),
                };
                let part = json!({
                    "functionResponse": {
                        "name": m.tool_name.clone().unwrap_or_default(),
                        "response": response,
                    }
                });
                let merged = contents
                    .last_mut()
                    .filter(|last| {
                        last["role"] == "user"
                            && last["parts"]
                                .as_array()
                                .is_some_and(|p| p.iter().all(|x| x.get("functionResponse").is_some()))
                    })
                    .and_then(|last| last["parts"].as_array_mut());
                match merged {
                    Some(parts) => parts.push(part),
                    None => contents.push(json!({"role": "user", "parts": [part]})),
                }
            }
        }
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": config.temperature,
            "maxOutputTokens": max_tokens,
        },
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
    }
    if let Some(tools) = tools {
        let decls: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": decls}]);
        if choice == ToolChoice::Never {
            body["toolConfig"] = json!({"functionCallingConfig": {"mode": "NONE"}});
        }
    }

    body
}

/// Parse a Gemini `generateContent` response.
pub fn parse_google_response(body: &str) -> Result<ModelResponse, InferenceError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Response {
        #[serde(default)]
        candidates: Vec<Candidate>,
        prompt_feedback: Option<PromptFeedback>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct PromptFeedback {
        block_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Candidate {
        content: Option<Content>,
    }

    #[derive(Deserialize)]
    struct Content {
        #[serde(default)]
        parts: Vec<Part>,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Part {
        text: Option<String>,
        function_call: Option<FunctionCall>,
    }

    #[derive(Deserialize)]
    struct FunctionCall {
        name: String,
        #[serde(default)]
        args: Value,
    }

    let resp: Response = serde_json::from_str(body)
        .map_err(|e| invalid(format!("failed to parse generateContent response: {e}")))?;

    let Some(candidate) = resp.candidates.into_iter().next() else {
        let reason = resp
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .map(|r| format!("prompt blocked: {r}"))
            .unwrap_or_else(|| "no candidates in response".to_string());
        return Err(invalid(reason));
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            tool_calls.push(ToolCall {
                id: new_call_id(),
                name: fc.name,
                arguments: if fc.args.is_null() {
                    Value::Object(Map::new())
                } else {
                    fc.args
                },
            });
        }
    }

    Ok(ModelResponse {
        content: text,
        tool_calls,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
