//! The analysis loop as an explicit state machine.
//!
//! ```text
//! InitialAnalysis ──▶ ToolCalling ⇄ ContinueAnalysis ──▶ FinalAnalysis ──▶ Completed
//!        │                                                                   ▲
//!        └────────────────────────── no tool calls ──────────────────────────┘
//! ```
//!
//! [`transition`] is pure: the orchestrator performs the I/O for the current
//! state, reduces the outcome to a [`StepEvent`], and asks for the next
//! state. Combinations that cannot happen leave the state unchanged.

use serde::Serialize;

/// Where the analysis loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    InitialAnalysis,
    /// Executing the tool calls of round `round` (1-based).
    ToolCalling { round: u32 },
    /// Asking the model to continue after round `round`.
    ContinueAnalysis { round: u32 },
    FinalAnalysis { round: u32 },
    Completed,
}

impl LoopState {
    /// Tool rounds started so far.
    pub fn round(self) -> u32 {
        match self {
            LoopState::InitialAnalysis | LoopState::Completed => 0,
            LoopState::ToolCalling { round }
            | LoopState::ContinueAnalysis { round }
            | LoopState::FinalAnalysis { round } => round,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LoopState::Completed
    }

    /// Short label for logs.
    pub fn name(self) -> &'static str {
        match self {
            LoopState::InitialAnalysis => "initial_analysis",
            LoopState::ToolCalling { .. } => "tool_calling",
            LoopState::ContinueAnalysis { .. } => "continue_analysis",
            LoopState::FinalAnalysis { .. } => "final_analysis",
            LoopState::Completed => "completed",
        }
    }
}

/// Outcome of the work done in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The model answered.
    ModelReplied {
        tool_calls_requested: bool,
        completion_marker: bool,
    },
    /// Every requested tool ran (successfully or not).
    ToolsExecuted,
    /// The model call failed after retries.
    ModelFailed,
    /// The caller cancelled the analysis.
    Cancelled,
}

/// Per-request limits that shape the transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub round_cap: u32,
    pub tools_enabled: bool,
    pub honor_completion_marker: bool,
}

impl LoopLimits {
    /// Whether tool rounds can happen at all.
    fn allows_tools(&self) -> bool {
        self.tools_enabled && self.round_cap > 0
    }

    /// Whether a reply asks for (more) tool work.
    fn wants_tools(&self, tool_calls_requested: bool, completion_marker: bool) -> bool {
        self.allows_tools()
            && tool_calls_requested
            && !(self.honor_completion_marker && completion_marker)
    }

    /// Upper bound on model invocations for one analysis.
    pub fn max_model_calls(&self) -> u32 {
        if self.allows_tools() {
            self.round_cap + 2
        } else {
            1
        }
    }
}

/// Compute the next state.
pub fn transition(state: LoopState, event: &StepEvent, limits: &LoopLimits) -> LoopState {
    use LoopState::*;

    if matches!(event, StepEvent::Cancelled) {
        return Completed;
    }

    match (state, *event) {
        (Completed, _) => Completed,

        (
            InitialAnalysis,
            StepEvent::ModelReplied {
                tool_calls_requested,
                completion_marker,
            },
        ) => {
            if limits.wants_tools(tool_calls_requested, completion_marker) {
                ToolCalling { round: 1 }
            } else {
                Completed
            }
        }
        (InitialAnalysis, StepEvent::ModelFailed) => Completed,

        (ToolCalling { round }, StepEvent::ToolsExecuted) => ContinueAnalysis { round },

        (
            ContinueAnalysis { round },
            StepEvent::ModelReplied {
                tool_calls_requested,
                completion_marker,
            },
        ) => {
            if limits.wants_tools(tool_calls_requested, completion_marker)
                && round < limits.round_cap
            {
                ToolCalling { round: round + 1 }
            } else {
                FinalAnalysis { round }
            }
        }
        // The caller degrades to the best answer already in the ledger.
        (ContinueAnalysis { .. }, StepEvent::ModelFailed) => Completed,

        (FinalAnalysis { .. }, StepEvent::ModelReplied { .. } | StepEvent::ModelFailed) => {
            Completed
        }

        (other, _) => other,
    }
}
