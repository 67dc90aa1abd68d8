//! Events that can occur in a conversation

use crate::state_machine::state::ToolCall;
use crate::store::{ErrorKind, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },

    /// A human review decision for the pending tool call
    Review {
        decision: ReviewDecision,
    },

    // LLM events
    LlmResponse {
        text: String,
        /// Tool calls requested by the assistant, in call order
        tool_calls: Vec<ToolCall>,
    },
    LlmError {
        message: String,
        error_kind: ErrorKind,
        attempt: u32,
    },
    RetryTimeout {
        attempt: u32,
    },

    // Tool events
    ToolComplete {
        tool_call_id: String,
        result: ToolResult,
    },
}

/// A human decision on a suspended tool call.
///
/// Consumed exactly once per suspension. `update` and `feedback` name the
/// call they respond to; a mismatch against the reviewed call is an
/// invariant violation, fatal for the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Execute the pending tool calls unchanged
    Continue,
    /// Replace the reviewed call's arguments, then execute
    Update { tool_call_id: String, args: Value },
    /// Skip execution; the text is fed back to the model as the tool result
    Feedback { tool_call_id: String, text: String },
}
