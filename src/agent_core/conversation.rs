//! ConversationLedger: the append-only message history of one analysis.
//!
//! Responsibilities:
//! - Record every message sent to or received from the model, tagged with
//!   the loop state that produced it
//! - Keep the latest result of each tool, keyed by tool name
//! - Build `Vec<ChatMessage>` for the model
//! - Replay a prefix of the history and render a transcript for debugging
//!
//! Entries are never edited or removed once pushed.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use super::response_analysis::contains_verdict;
use super::state_machine::LoopState;
use crate::inference::types::{ChatMessage, Role, ToolCall};

// ─── Types ───────────────────────────────────────────────────────────────────

/// One message and the loop state it was recorded in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub state: LoopState,
    pub message: ChatMessage,
}

// ─── ConversationLedger ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationLedger {
    entries: Vec<LedgerEntry>,
    tool_results: BTreeMap<String, Value>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns its index.
    pub fn push(&mut self, state: LoopState, message: ChatMessage) -> usize {
        self.entries.push(LedgerEntry { state, message });
        self.entries.len() - 1
    }

    /// Record the result of a tool; a later result for the same tool
    /// replaces the earlier one.
    pub fn record_tool_result(&mut self, tool_name: &str, result: Value) {
        self.tool_results.insert(tool_name.to_string(), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn tool_results(&self) -> &BTreeMap<String, Value> {
        &self.tool_results
    }

    pub fn has_tool_results(&self) -> bool {
        !self.tool_results.is_empty()
    }

    /// The full history as model input.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.replay(self.entries.len())
    }

    /// The first `upto` messages, i.e. the conversation exactly as the model
    /// saw it before entry `upto` was recorded.
    pub fn replay(&self, upto: usize) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .take(upto)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Most recent assistant message.
    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .rev()
            .map(|e| &e.message)
            .find(|m| m.role == Role::Assistant)
    }

    /// Most recent assistant message whose text holds a verdict object.
    pub fn last_verdict(&self) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .rev()
            .map(|e| &e.message)
            .find(|m| m.role == Role::Assistant && contains_verdict(&m.content))
    }

    /// Tool calls of the last message if it is an assistant message whose
    /// calls have not been answered yet.
    pub fn unanswered_tool_calls(&self) -> &[ToolCall] {
        match self.entries.last() {
            Some(LedgerEntry { message, .. }) if message.role == Role::Assistant => {
                &message.tool_calls
            }
            _ => &[],
        }
    }

    /// Human-readable dump of the history, one entry per block.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let role = match entry.message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let _ = write!(out, "[{i}] {} {role}", entry.state.name());
            if let Some(name) = &entry.message.tool_name {
                let _ = write!(out, " ({name})");
            }
            let _ = writeln!(out, ": {}", entry.message.content);
            for call in &entry.message.tool_calls {
                let _ = writeln!(out, "    -> {}({}) id={}", call.name, call.arguments, call.id);
            }
        }
        out
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
