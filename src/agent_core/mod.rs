//! Agent Core: the analysis loop.
//!
//! Submodules:
//! - `state_machine`: Loop states and the pure transition function
//! - `conversation`: Append-only message ledger with replay and transcript
//! - `prompts`: Prompt text for each step
//! - `response_analysis`: Completion-marker and verdict detection in model text
//! - `orchestrator`: Runs the loop against a model and the tool registry;
//!   `PhishingAnalyzer` is the public entry point

pub mod conversation;
pub mod orchestrator;
pub mod prompts;
pub mod response_analysis;
pub mod state_machine;

// Re-exports for convenience
pub use conversation::{ConversationLedger, LedgerEntry};
pub use orchestrator::{
    AnalysisOrchestrator, AnalysisOutcome, HttpModelFactory, ModelFactory, PhishingAnalyzer,
};
pub use state_machine::{transition, LoopLimits, LoopState, StepEvent};
