//! Analysis orchestrator: drives one email through the analysis loop.
//!
//! ```text
//! PhishingAnalyzer::analyze(request)
//!   ├─ request.validate + validate_config   (ConfigError → Err)
//!   ├─ ModelFactory::create                 (ChatModel handle)
//!   └─ AnalysisOrchestrator::run
//!        loop {
//!          cancelled?            → Completed (cancellation result)
//!          perform current state → StepEvent
//!          transition(state, event)
//!        }
//!        → AnalysisResult (always well-formed)
//! ```
//!
//! The orchestrator owns all I/O; [`transition`] owns all decisions. Every
//! message goes into the [`ConversationLedger`], which only grows.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::conversation::ConversationLedger;
use super::prompts::{analysis_prompt, continue_prompt, final_prompt, system_prompt};
use super::response_analysis::has_completion_marker;
use super::state_machine::{transition, LoopLimits, LoopState, StepEvent};
use crate::analysis::errors::AnalysisError;
use crate::analysis::types::{AnalysisRequest, AnalysisResult};
use crate::analysis::validator::{parse_analysis, truncate_with_ellipsis};
use crate::inference::client::{create_model, invoke_with_retry, ChatModel, RetryPolicy};
use crate::inference::config::{validate_config, validate_settings, AnalyzerSettings, ModelConfig};
use crate::inference::types::{ChatMessage, ModelResponse, ToolChoice, ToolDefinition};
use crate::tools::registry::ToolRegistry;
use crate::tools::types::error_payload;

/// Observation recorded for tool calls the loop will not execute.
const ROUND_LIMIT_OBSERVATION: &str = "not executed: tool round limit reached";

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// Everything a run produced, for callers that want more than the verdict.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub run_id: Uuid,
    pub result: AnalysisResult,
    pub ledger: ConversationLedger,
    /// Model invocations made (retries of one call count once).
    pub model_calls: u32,
    /// Tool rounds started.
    pub rounds: u32,
}

// ─── AnalysisOrchestrator ────────────────────────────────────────────────────

/// Runs the analysis loop against a model handle.
///
/// Holds only shared, read-only state, so a single orchestrator can serve
/// concurrent analyses.
pub struct AnalysisOrchestrator {
    registry: Arc<ToolRegistry>,
    settings: AnalyzerSettings,
}

impl AnalysisOrchestrator {
    pub fn new(registry: Arc<ToolRegistry>, settings: AnalyzerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyze `request` with `model`.
    ///
    /// Never fails: model, tool, parse and cancellation failures all resolve
    /// to a well-formed result (with `is_error` set where appropriate).
    pub async fn run(
        &self,
        model: &dyn ChatModel,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> AnalysisOutcome {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let tools_enabled = request.tools_enabled()
            && model.supports_tool_calling()
            && self.settings.round_cap > 0;
        let limits = LoopLimits {
            round_cap: self.settings.round_cap,
            tools_enabled,
            honor_completion_marker: self.settings.honor_completion_marker,
        };
        let policy = RetryPolicy::from_settings(&self.settings);
        let definitions = if tools_enabled {
            self.registry.definitions(&request.tool_settings)
        } else {
            Vec::new()
        };
        let tools = tools_enabled.then_some(definitions.as_slice());

        tracing::info!(
            %run_id,
            model = %model.model_name(),
            tools_enabled,
            tool_count = definitions.len(),
            round_cap = limits.round_cap,
            email_chars = request.email_content.chars().count(),
            "analysis started"
        );

        let mut run = Run {
            run_id,
            model,
            policy,
            ledger: ConversationLedger::new(),
            model_calls: 0,
        };
        let mut state = LoopState::InitialAnalysis;
        let mut rounds = 0;
        let mut terminal: Option<AnalysisResult> = None;

        run.ledger
            .push(state, ChatMessage::system(system_prompt(tools_enabled)));
        run.ledger
            .push(state, ChatMessage::user(analysis_prompt(&request.email_content)));

        while !state.is_terminal() {
            if cancel.is_cancelled() {
                tracing::info!(%run_id, step = state.name(), "analysis cancelled");
                terminal = Some(AnalysisResult::from_error(&AnalysisError::Cancelled));
                state = transition(state, &StepEvent::Cancelled, &limits);
                continue;
            }

            let event = match state {
                LoopState::InitialAnalysis => match run.call(state, tools, ToolChoice::Auto).await {
                    Ok(response) => run.record_reply(state, response),
                    Err(e) => {
                        terminal = Some(AnalysisResult::from_error(&e));
                        StepEvent::ModelFailed
                    }
                },

                LoopState::ToolCalling { round } => {
                    self.execute_tools(&mut run, state, request, round).await;
                    StepEvent::ToolsExecuted
                }

                LoopState::ContinueAnalysis { round } => {
                    run.ledger.push(
                        state,
                        ChatMessage::user(continue_prompt(round, limits.round_cap)),
                    );
                    match run.call(state, tools, ToolChoice::Auto).await {
                        Ok(response) => run.record_reply(state, response),
                        Err(e) => {
                            terminal = Some(degrade(&run, &e));
                            StepEvent::ModelFailed
                        }
                    }
                }

                LoopState::FinalAnalysis { .. } => {
                    close_unanswered_calls(&mut run.ledger, state);
                    if run.ledger.has_tool_results() {
                        run.ledger.push(state, ChatMessage::user(final_prompt()));
                        // Definitions stay on the request: the ledger
                        // holds tool turns that some providers only accept
                        // alongside them.
                        match run.call(state, tools, ToolChoice::Never).await {
                            Ok(response) => {
                                terminal = Some(parse_analysis(&response.content));
                                run.record_reply(state, response)
                            }
                            Err(e) => {
                                terminal = Some(degrade(&run, &e));
                                StepEvent::ModelFailed
                            }
                        }
                    } else {
                        // Nothing new to reason over; the last answer stands.
                        StepEvent::ModelReplied {
                            tool_calls_requested: false,
                            completion_marker: false,
                        }
                    }
                }

                LoopState::Completed => break,
            };

            let next = transition(state, &event, &limits);
            tracing::debug!(
                %run_id,
                from = state.name(),
                to = next.name(),
                round = next.round(),
                ?event,
                "state transition"
            );
            rounds = rounds.max(next.round());
            state = next;
        }

        let result = terminal.unwrap_or_else(|| match run.ledger.last_assistant() {
            Some(message) => parse_analysis(&message.content),
            None => AnalysisResult::conservative_fallback(&AnalysisError::ParseError {
                reason: "the model produced no answer".into(),
            }),
        });

        tracing::info!(
            %run_id,
            model_calls = run.model_calls,
            rounds,
            tool_results = run.ledger.tool_results().len(),
            is_phishing = result.is_phishing,
            confidence = result.confidence_score,
            risk = %result.risk_level,
            is_error = result.is_error,
            duration_ms = started.elapsed().as_millis() as u64,
            "analysis completed"
        );

        AnalysisOutcome {
            run_id,
            result,
            ledger: run.ledger,
            model_calls: run.model_calls,
            rounds,
        }
    }

    /// Execute the pending tool calls in request order and record each
    /// result as a tool message.
    async fn execute_tools(
        &self,
        run: &mut Run<'_>,
        state: LoopState,
        request: &AnalysisRequest,
        round: u32,
    ) {
        let calls = run.ledger.unanswered_tool_calls().to_vec();
        tracing::info!(
            run_id = %run.run_id,
            round,
            tool_count = calls.len(),
            "executing tool calls"
        );

        for call in &calls {
            let result = self.registry.execute(call, &request.tool_settings).await;
            if !result.success {
                tracing::warn!(
                    run_id = %run.run_id,
                    round,
                    tool = %call.name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "tool failed, continuing with error observation"
                );
            }
            let observation =
                truncate_with_ellipsis(&result.to_observation(), self.settings.max_tool_result_chars);
            run.ledger
                .push(state, ChatMessage::tool_result(call, observation));
            run.ledger.record_tool_result(&call.name, result.result);
        }
    }
}

// ─── Run ─────────────────────────────────────────────────────────────────────

/// Mutable state of a single run.
struct Run<'a> {
    run_id: Uuid,
    model: &'a dyn ChatModel,
    policy: RetryPolicy,
    ledger: ConversationLedger,
    model_calls: u32,
}

impl Run<'_> {
    async fn call(
        &mut self,
        state: LoopState,
        tools: Option<&[ToolDefinition]>,
        choice: ToolChoice,
    ) -> Result<ModelResponse, AnalysisError> {
        self.model_calls += 1;
        let messages = self.ledger.messages();
        let start = Instant::now();
        let outcome = invoke_with_retry(self.model, &messages, tools, choice, &self.policy).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(response) => {
                tracing::info!(
                    run_id = %self.run_id,
                    step = state.name(),
                    round = state.round(),
                    call = self.model_calls,
                    tool_calls = response.tool_calls.len(),
                    content_len = response.content.len(),
                    duration_ms,
                    "model replied"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    step = state.name(),
                    round = state.round(),
                    call = self.model_calls,
                    error = %e,
                    duration_ms,
                    "model call failed"
                );
                Err(e.into())
            }
        }
    }

    /// Append the assistant reply and reduce it to an event.
    fn record_reply(&mut self, state: LoopState, response: ModelResponse) -> StepEvent {
        let event = StepEvent::ModelReplied {
            tool_calls_requested: response.has_tool_calls(),
            completion_marker: has_completion_marker(&response.content),
        };
        self.ledger.push(
            state,
            ChatMessage::assistant(response.content, response.tool_calls),
        );
        event
    }
}

/// Answer tool calls the loop will not execute, so every assistant tool
/// call in the ledger has a matching tool message.
fn close_unanswered_calls(ledger: &mut ConversationLedger, state: LoopState) {
    let calls = ledger.unanswered_tool_calls().to_vec();
    for call in &calls {
        ledger.push(
            state,
            ChatMessage::tool_result(call, error_payload(ROUND_LIMIT_OBSERVATION).to_string()),
        );
    }
}

/// Result to return when a continue or final model call fails: the latest
/// verdict the model already gave, else an error result.
fn degrade(run: &Run<'_>, error: &AnalysisError) -> AnalysisResult {
    match run.ledger.last_verdict() {
        Some(message) => {
            tracing::warn!(
                run_id = %run.run_id,
                error = %error,
                "model failed after tool use, falling back to earlier verdict"
            );
            parse_analysis(&message.content)
        }
        None => AnalysisResult::from_error(error),
    }
}

// ─── PhishingAnalyzer ────────────────────────────────────────────────────────

/// Creates model handles for requests.
pub trait ModelFactory: Send + Sync {
    fn create(
        &self,
        config: &ModelConfig,
        settings: &AnalyzerSettings,
    ) -> Result<Box<dyn ChatModel>, AnalysisError>;
}

/// Factory for the built-in HTTP providers.
pub struct HttpModelFactory;

impl ModelFactory for HttpModelFactory {
    fn create(
        &self,
        config: &ModelConfig,
        settings: &AnalyzerSettings,
    ) -> Result<Box<dyn ChatModel>, AnalysisError> {
        create_model(config, settings)
    }
}

/// Entry point: validates a request, builds its model, runs the analysis.
pub struct PhishingAnalyzer {
    orchestrator: AnalysisOrchestrator,
    factory: Arc<dyn ModelFactory>,
}

impl PhishingAnalyzer {
    /// Analyzer using the HTTP providers and the configured search endpoint.
    pub fn new(settings: AnalyzerSettings) -> Result<Self, AnalysisError> {
        validate_settings(&settings)?;
        let registry = ToolRegistry::from_settings(&settings)
            .map_err(|e| AnalysisError::config(e.to_string()))?;
        Ok(Self::with_parts(
            settings,
            Arc::new(registry),
            Arc::new(HttpModelFactory),
        ))
    }

    pub fn with_parts(
        settings: AnalyzerSettings,
        registry: Arc<ToolRegistry>,
        factory: Arc<dyn ModelFactory>,
    ) -> Self {
        Self {
            orchestrator: AnalysisOrchestrator::new(registry, settings),
            factory,
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        self.orchestrator.settings()
    }

    /// Analyze an email.
    ///
    /// Returns `Err` only for configuration problems detected before any
    /// model call. Everything else is reported inside the result.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// [`analyze`](Self::analyze) with a caller-owned cancellation token.
    pub async fn analyze_with_cancel(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        Ok(self.run(request, cancel).await?.result)
    }

    /// Like [`analyze_with_cancel`](Self::analyze_with_cancel) but returns the
    /// full outcome, ledger included.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        validate_settings(self.settings())?;
        request.validate(self.settings().max_email_chars)?;

        let validation = validate_config(&request.model_config);
        if !validation.valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "invalid model configuration".to_string());
            tracing::warn!(
                provider = %request.model_config.provider,
                reason = %reason,
                "rejected model configuration"
            );
            return Err(AnalysisError::config(reason));
        }

        let model = self
            .factory
            .create(&request.model_config, self.settings())?;
        Ok(self.orchestrator.run(model.as_ref(), request, cancel).await)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::RiskLevel;
    use crate::inference::config::Provider;
    use crate::inference::errors::InferenceError;
    use crate::inference::types::{Role, ToolCall};
    use crate::tools::types::{ToolName, ToolSettings};
    use crate::tools::web_search::{SearchHit, SearchProvider};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    const VERDICT: &str = r#"{"isPhishing": true, "confidenceScore": 92, "suspiciousPoints": ["IP-literal login link"], "explanation": "Credential harvesting link.", "riskLevel": "high"}"#;

    // ── Stubs ────────────────────────────────────────────────────────

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _: &str, _: usize, _: Option<&str>) -> anyhow::Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    /// Replays scripted replies, then answers with `VERDICT`.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse, InferenceError>>>,
        calls: AtomicU32,
        /// Per call: `None` when no tools were offered.
        offered_tools: Mutex<Vec<Option<ToolChoice>>>,
        cancel_on_call: Option<CancellationToken>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse, InferenceError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                offered_tools: Mutex::new(Vec::new()),
                cancel_on_call: None,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn invoke(
            &self,
            _messages: &[ChatMessage],
            tools: Option<&[ToolDefinition]>,
            choice: ToolChoice,
        ) -> Result<ModelResponse, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.offered_tools
                .lock()
                .unwrap()
                .push(tools.map(|_| choice));
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelResponse::text(VERDICT)))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Requests a tool on every call, even when none are offered.
    struct ToolHungryModel {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChatModel for ToolHungryModel {
        async fn invoke(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _choice: ToolChoice,
        ) -> Result<ModelResponse, InferenceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(tool_reply("", vec![url_call(&format!("call_{n}"))]))
        }

        fn model_name(&self) -> &str {
            "tool-hungry"
        }
    }

    fn url_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "url_analyzer".into(),
            arguments: json!({"urls": ["http://203.0.113.5/verify-login"]}),
        }
    }

    fn tool_reply(content: &str, tool_calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse {
            content: content.into(),
            tool_calls,
        }
    }

    fn auth_failure() -> InferenceError {
        InferenceError::HttpError {
            status: 401,
            body: "invalid_api_key".into(),
        }
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            max_retries: 0,
            ..AnalyzerSettings::default()
        }
    }

    fn orchestrator(settings: AnalyzerSettings) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(Arc::new(ToolRegistry::new(Arc::new(NoSearch))), settings)
    }

    fn config() -> ModelConfig {
        ModelConfig::new(Provider::OpenAi, "gpt-4o-mini", 0.2, "sk-test")
    }

    fn request_with_tools() -> AnalysisRequest {
        AnalysisRequest::new("Verify your account at http://203.0.113.5/verify-login", config())
            .with_tools(ToolSettings::all_offline())
    }

    fn tool_messages(outcome: &AnalysisOutcome) -> Vec<&ChatMessage> {
        outcome
            .ledger
            .entries()
            .iter()
            .map(|e| &e.message)
            .filter(|m| m.role == Role::Tool)
            .collect()
    }

    // ── Loop behaviour ───────────────────────────────────────────────

    #[tokio::test]
    async fn direct_answer_takes_one_model_call() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text(VERDICT))]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 1);
        assert_eq!(outcome.model_calls, 1);
        assert_eq!(outcome.rounds, 0);
        assert!(outcome.result.is_phishing);
        assert_eq!(outcome.result.confidence_score, 92);
        assert_eq!(outcome.result.risk_level, RiskLevel::High);
        assert!(!outcome.result.is_error);
    }

    #[tokio::test]
    async fn tool_round_then_final_verdict() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply("", vec![url_call("call_1")])),
            Ok(ModelResponse::text("The link points at a bare IP address.")),
            Ok(ModelResponse::text(VERDICT)),
        ]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 3);
        assert_eq!(outcome.rounds, 1);
        // The final call keeps the definitions but forbids new calls.
        assert_eq!(
            *model.offered_tools.lock().unwrap(),
            vec![
                Some(ToolChoice::Auto),
                Some(ToolChoice::Auto),
                Some(ToolChoice::Never)
            ]
        );
        assert!(outcome.result.is_phishing);
        assert!(!outcome.result.is_error);

        let tools = tool_messages(&outcome);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_call_id.as_deref(), Some("call_1"));
        let observation: Value = serde_json::from_str(&tools[0].content).unwrap();
        assert_eq!(observation["riskLevel"], "high");
        assert_eq!(
            outcome.ledger.tool_results()["url_analyzer"]["riskLevel"],
            "high"
        );
    }

    #[tokio::test]
    async fn tool_hungry_model_is_bounded_by_round_cap() {
        let model = ToolHungryModel {
            calls: AtomicU32::new(0),
        };
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 7);
        assert_eq!(outcome.model_calls, 7);
        assert_eq!(outcome.rounds, 5);
        // The final reply is a tool request with no text.
        assert!(outcome.result.is_error);
        assert_eq!(outcome.result.risk_level, RiskLevel::Medium);

        // Calls from the capped round are answered with a synthetic result.
        let tools = tool_messages(&outcome);
        assert_eq!(tools.len(), 6);
        assert!(tools[5].content.contains(ROUND_LIMIT_OBSERVATION));
    }

    #[tokio::test]
    async fn smaller_round_cap_reduces_calls() {
        let model = ToolHungryModel {
            calls: AtomicU32::new(0),
        };
        let outcome = orchestrator(AnalyzerSettings {
            round_cap: 2,
            ..settings()
        })
        .run(&model, &request_with_tools(), &CancellationToken::new())
        .await;
        assert_eq!(outcome.model_calls, 4);
    }

    #[tokio::test]
    async fn zero_round_cap_never_enters_a_tool_round() {
        let model = ToolHungryModel {
            calls: AtomicU32::new(0),
        };
        let outcome = orchestrator(AnalyzerSettings {
            round_cap: 0,
            ..settings()
        })
        .run(&model, &request_with_tools(), &CancellationToken::new())
        .await;

        assert_eq!(outcome.model_calls, 1);
        assert_eq!(outcome.rounds, 0);
        assert!(tool_messages(&outcome).is_empty());
    }

    #[tokio::test]
    async fn tools_disabled_is_a_single_call() {
        let model = ScriptedModel::new(vec![Ok(tool_reply(VERDICT, vec![url_call("call_1")]))]);
        let request = AnalysisRequest::new("Hello, lunch on Friday?", config());
        let outcome = orchestrator(settings())
            .run(&model, &request, &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 1);
        assert_eq!(*model.offered_tools.lock().unwrap(), vec![None]);
        assert!(tool_messages(&outcome).is_empty());
        assert!(outcome.result.is_phishing);
    }

    #[tokio::test]
    async fn failing_tool_becomes_observation() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply(
                "",
                vec![ToolCall {
                    id: "call_x".into(),
                    name: "delete_inbox".into(),
                    arguments: json!({}),
                }],
            )),
            Ok(ModelResponse::text("No tool evidence, deciding from content.")),
        ]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        let tools = tool_messages(&outcome);
        assert_eq!(tools.len(), 1);
        assert!(tools[0].content.contains("\"error\":true"));
        assert!(tools[0].content.contains("unknown tool"));
        assert!(!outcome.result.is_error);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn disabled_tool_request_is_reported_not_run() {
        let model = ScriptedModel::new(vec![Ok(tool_reply(
            "",
            vec![ToolCall {
                id: "call_s".into(),
                name: "web_search".into(),
                arguments: json!({"query": "example.com scam"}),
            }],
        ))]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;
        let tools = tool_messages(&outcome);
        assert!(tools[0].content.contains("not enabled"));
    }

    #[tokio::test]
    async fn long_tool_results_are_truncated() {
        let urls: Vec<String> = (0..200)
            .map(|i| format!("https://secure-login-{i}.example.com/verify"))
            .collect();
        let model = ScriptedModel::new(vec![Ok(tool_reply(
            "",
            vec![ToolCall {
                id: "call_big".into(),
                name: "url_analyzer".into(),
                arguments: json!({ "urls": urls }),
            }],
        ))]);
        let outcome = orchestrator(AnalyzerSettings {
            max_tool_result_chars: 500,
            ..settings()
        })
        .run(&model, &request_with_tools(), &CancellationToken::new())
        .await;

        let tools = tool_messages(&outcome);
        assert_eq!(tools[0].content.chars().count(), 500);
        assert!(tools[0].content.ends_with("..."));
        // The ledger keeps the full structured result.
        assert_eq!(
            outcome.ledger.tool_results()["url_analyzer"]["urls"]
                .as_array()
                .unwrap()
                .len(),
            200
        );
    }

    // ── Failure handling ─────────────────────────────────────────────

    #[tokio::test]
    async fn prose_answer_yields_fallback() {
        let model = ScriptedModel::new(vec![Ok(ModelResponse::text(
            "This email looks fine to me, nothing to worry about.",
        ))]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert!(outcome.result.is_error);
        assert_eq!(outcome.result.risk_level, RiskLevel::Medium);
        assert!(!outcome.result.explanation.is_empty());
    }

    #[tokio::test]
    async fn initial_failure_is_connection_error_result() {
        let model = ScriptedModel::new(vec![Err(auth_failure())]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 1);
        assert!(outcome.result.is_error);
        assert!(outcome
            .result
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection error"));
    }

    #[tokio::test]
    async fn continue_failure_degrades_to_earlier_verdict() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply(VERDICT, vec![url_call("call_1")])),
            Err(auth_failure()),
        ]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 2);
        assert!(!outcome.result.is_error);
        assert!(outcome.result.is_phishing);
        assert_eq!(outcome.result.confidence_score, 92);
    }

    #[tokio::test]
    async fn final_failure_without_verdict_is_error_result() {
        let model = ScriptedModel::new(vec![
            Ok(tool_reply("", vec![url_call("call_1")])),
            Ok(ModelResponse::text("Evidence looks bad.")),
            Err(auth_failure()),
        ]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;

        assert_eq!(model.calls(), 3);
        assert!(outcome.result.is_error);
        assert!(!outcome.result.is_phishing);
        assert_eq!(outcome.result.confidence_score, 0);
    }

    // ── Cancellation ─────────────────────────────────────────────────

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let model = ScriptedModel::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &cancel)
            .await;

        assert_eq!(model.calls(), 0);
        assert!(outcome.result.is_error);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("analysis cancelled")
        );
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_steps() {
        let cancel = CancellationToken::new();
        let mut model = ScriptedModel::new(vec![Ok(tool_reply("", vec![url_call("call_1")]))]);
        model.cancel_on_call = Some(cancel.clone());

        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &cancel)
            .await;

        assert_eq!(model.calls(), 1);
        assert!(tool_messages(&outcome).is_empty());
        assert!(outcome.result.is_error);
        assert_eq!(
            outcome.result.error_message.as_deref(),
            Some("analysis cancelled")
        );
    }

    // ── Completion marker ────────────────────────────────────────────

    #[tokio::test]
    async fn completion_marker_ignored_by_default() {
        let reply = format!("ANALYSIS_COMPLETE {VERDICT}");
        let model = ScriptedModel::new(vec![Ok(tool_reply(&reply, vec![url_call("call_1")]))]);
        let outcome = orchestrator(settings())
            .run(&model, &request_with_tools(), &CancellationToken::new())
            .await;
        assert_eq!(tool_messages(&outcome).len(), 1);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn completion_marker_honored_when_configured() {
        let reply = format!("ANALYSIS_COMPLETE {VERDICT}");
        let model = ScriptedModel::new(vec![Ok(tool_reply(&reply, vec![url_call("call_1")]))]);
        let outcome = orchestrator(AnalyzerSettings {
            honor_completion_marker: true,
            ..settings()
        })
        .run(&model, &request_with_tools(), &CancellationToken::new())
        .await;

        assert_eq!(model.calls(), 1);
        assert!(tool_messages(&outcome).is_empty());
        assert!(outcome.result.is_phishing);
        assert!(!outcome.result.is_error);
    }

    // ── PhishingAnalyzer ─────────────────────────────────────────────

    struct ScriptFactory {
        replies: Vec<ModelResponse>,
        created: AtomicU32,
    }

    impl ModelFactory for ScriptFactory {
        fn create(
            &self,
            _config: &ModelConfig,
            _settings: &AnalyzerSettings,
        ) -> Result<Box<dyn ChatModel>, AnalysisError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedModel::new(
                self.replies.iter().cloned().map(Ok).collect(),
            )))
        }
    }

    fn analyzer(replies: Vec<ModelResponse>) -> (PhishingAnalyzer, Arc<ScriptFactory>) {
        let factory = Arc::new(ScriptFactory {
            replies,
            created: AtomicU32::new(0),
        });
        let analyzer = PhishingAnalyzer::with_parts(
            settings(),
            Arc::new(ToolRegistry::new(Arc::new(NoSearch))),
            factory.clone(),
        );
        (analyzer, factory)
    }

    #[tokio::test]
    async fn analyzer_returns_verdict() {
        let (analyzer, _) = analyzer(vec![ModelResponse::text(VERDICT)]);
        let result = analyzer.analyze(&request_with_tools()).await.unwrap();
        assert!(result.is_phishing);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn invalid_model_config_fails_before_any_model_is_built() {
        let (analyzer, factory) = analyzer(vec![]);
        let bad_key = AnalysisRequest::new(
            "hello",
            ModelConfig::new(Provider::Anthropic, "claude-3-5-haiku-latest", 0.2, "sk-wrong"),
        );
        let err = analyzer.analyze(&bad_key).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError { .. }));

        let bad_temp = AnalysisRequest::new(
            "hello",
            ModelConfig::new(Provider::OpenAi, "gpt-4o-mini", 3.5, "sk-test"),
        );
        assert!(analyzer.analyze(&bad_temp).await.is_err());
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_email_is_rejected() {
        let (analyzer, factory) = analyzer(vec![]);
        let err = analyzer
            .analyze(&AnalysisRequest::new("  \n ", config()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn analyzer_run_exposes_ledger() {
        let (analyzer, _) = analyzer(vec![ModelResponse::text(VERDICT)]);
        let request = AnalysisRequest::new("hello", config())
            .with_tools(ToolSettings::default().enable(ToolName::DomainChecker));
        let outcome = analyzer
            .run(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.ledger.len(), 3);
        assert!(outcome.ledger.transcript().contains("initial_analysis system"));
    }

    #[tokio::test]
    async fn zero_round_cap_is_a_config_error() {
        let zero_cap = AnalyzerSettings {
            round_cap: 0,
            ..settings()
        };
        let err = PhishingAnalyzer::new(zero_cap.clone()).err().unwrap();
        assert!(matches!(err, AnalysisError::ConfigError { .. }));

        let factory = Arc::new(ScriptFactory {
            replies: vec![ModelResponse::text(VERDICT)],
            created: AtomicU32::new(0),
        });
        let analyzer = PhishingAnalyzer::with_parts(
            zero_cap,
            Arc::new(ToolRegistry::new(Arc::new(NoSearch))),
            factory.clone(),
        );
        let err = analyzer.analyze(&request_with_tools()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError { .. }));
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn analyzer_builds_with_default_settings() {
        let analyzer = PhishingAnalyzer::new(AnalyzerSettings::default()).unwrap();
        assert_eq!(analyzer.settings().round_cap, 5);
    }
}
