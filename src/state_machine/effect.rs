//! Effects produced by state transitions

use crate::state_machine::state::ToolCall;
use crate::store::ChatMessage;
use serde_json::Value;
use std::time::Duration;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a message to the dialogue transcript
    AppendMessage { message: ChatMessage },

    /// Snapshot transcript + state to the checkpoint store
    PersistCheckpoint,

    /// Make an LLM request
    RequestLlm,

    /// Execute a tool (spawned as a background task)
    ExecuteTool { tool: ToolCall },

    /// Surface a review payload to the human actor and suspend
    RequestReview { question: String, tool: ToolCall },

    /// Schedule a retry
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Notify connected clients
    NotifyClient { event_type: String, data: Value },
}

/// The question surfaced with a suspended tool call's review payload
pub fn review_question(tool: &ToolCall) -> String {
    format!("Approve the pending `{}` call before it runs?", tool.name())
}

impl Effect {
    pub fn append(message: ChatMessage) -> Self {
        Effect::AppendMessage { message }
    }

    pub fn request_review(tool: ToolCall) -> Self {
        Effect::RequestReview {
            question: review_question(&tool),
            tool,
        }
    }

    #[allow(clippy::needless_pass_by_value)] // data is consumed by json! macro
    pub fn notify_state_change(state: &str, data: Value) -> Self {
        Effect::NotifyClient {
            event_type: "state_change".to_string(),
            data: serde_json::json!({
                "state": state,
                "state_data": data
            }),
        }
    }

    pub fn notify_agent_done() -> Self {
        Effect::NotifyClient {
            event_type: "agent_done".to_string(),
            data: Value::Null,
        }
    }
}
