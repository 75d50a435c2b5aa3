//! PhishLens: asks an LLM whether an email is a phishing attempt.
//!
//! The engine runs a bounded analysis loop: the model reads the email, may
//! call deterministic local tools (URL, domain, header and attachment
//! heuristics, plus an optional web search), and ends with a structured
//! [`AnalysisResult`]. Every path out of the loop yields a well-formed
//! result; only configuration problems are returned as errors.
//!
//! ```no_run
//! use phishlens::{AnalysisRequest, AnalyzerSettings, ModelConfig, PhishingAnalyzer, Provider};
//! use phishlens::tools::ToolSettings;
//!
//! # async fn demo() -> Result<(), phishlens::AnalysisError> {
//! let analyzer = PhishingAnalyzer::new(AnalyzerSettings::default())?;
//! let config = ModelConfig::new(Provider::OpenAi, "gpt-4o-mini", 0.2, "sk-...");
//! let request = AnalysisRequest::new("Dear customer, verify your account...", config)
//!     .with_tools(ToolSettings::all_offline());
//! let verdict = analyzer.analyze(&request).await?;
//! println!("{} ({}%)", verdict.risk_level, verdict.confidence_score);
//! # Ok(())
//! # }
//! ```

pub mod agent_core;
pub mod analysis;
pub mod inference;
pub mod logging;
pub mod tools;

// Re-exports for convenience
pub use agent_core::{AnalysisOrchestrator, AnalysisOutcome, ModelFactory, PhishingAnalyzer};
pub use analysis::{AnalysisError, AnalysisRequest, AnalysisResult, RiskLevel};
pub use inference::{AnalyzerSettings, ChatModel, ModelConfig, Provider};
pub use logging::{init_tracing, LogConfig};
pub use tools::{ToolName, ToolRegistry, ToolSettings};
