//! Resume decisions for checkpointed conversations
//!
//! A conversation can be suspended at any transition boundary - including
//! across process restarts - and resumed from its latest checkpoint. This
//! module decides what the runtime must do on startup for each checkpointed
//! state:
//!
//! - `AwaitingReview` is a durable suspension: nothing is re-driven, but the
//!   pending review payload is announced again so a reconnecting reviewer
//!   sees it.
//! - `LlmRequesting` means the process died with a request in flight; no
//!   message was appended, so the request is simply re-issued.
//! - `ToolExecuting` means the current tool may or may not have run. Tools
//!   are required to be retry-safe, so it is re-executed.

use crate::state_machine::state::ToolCall;
use crate::state_machine::{review_question, ConvState};

/// What the runtime does when starting from a checkpointed state
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeAction {
    /// Nothing in flight; wait for the next event
    Wait,
    /// Re-issue the interrupted LLM request
    ReissueLlm,
    /// Re-execute the interrupted tool (tools are retry-safe)
    ReexecuteTool(ToolCall),
    /// Re-announce the pending review payload, then keep waiting
    AnnounceReview { question: String, tool: ToolCall },
}

pub fn resume_action(state: &ConvState) -> ResumeAction {
    match state {
        ConvState::Idle | ConvState::Error { .. } => ResumeAction::Wait,
        ConvState::LlmRequesting { .. } => ResumeAction::ReissueLlm,
        ConvState::ToolExecuting { current_tool, .. } => {
            ResumeAction::ReexecuteTool(current_tool.clone())
        }
        ConvState::AwaitingReview { tool_calls } => match tool_calls.last() {
            Some(tool) => ResumeAction::AnnounceReview {
                question: review_question(tool),
                tool: tool.clone(),
            },
            None => ResumeAction::Wait,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::state::{CartUpdateInput, ToolInput};
    use crate::store::ErrorKind;

    fn cart_call(id: &str) -> ToolCall {
        ToolCall::new(
            id,
            ToolInput::CartUpdate(CartUpdateInput {
                product_id: "p1".to_string(),
                quantity: 1,
            }),
        )
    }

    #[test]
    fn test_idle_and_error_wait() {
        assert_eq!(resume_action(&ConvState::Idle), ResumeAction::Wait);
        assert_eq!(
            resume_action(&ConvState::Error {
                message: "x".to_string(),
                error_kind: ErrorKind::Network,
            }),
            ResumeAction::Wait
        );
    }

    #[test]
    fn test_interrupted_llm_request_reissued() {
        assert_eq!(
            resume_action(&ConvState::LlmRequesting { attempt: 2 }),
            ResumeAction::ReissueLlm
        );
    }

    #[test]
    fn test_interrupted_tool_reexecuted() {
        let state = ConvState::ToolExecuting {
            current_tool: cart_call("call-1"),
            remaining_tools: vec![cart_call("call-2")],
        };
        assert_eq!(
            resume_action(&state),
            ResumeAction::ReexecuteTool(cart_call("call-1"))
        );
    }

    #[test]
    fn test_awaiting_review_reannounces_last_call() {
        let state = ConvState::AwaitingReview {
            tool_calls: vec![cart_call("call-1"), cart_call("call-2")],
        };
        match resume_action(&state) {
            ResumeAction::AnnounceReview { tool, .. } => assert_eq!(tool.id, "call-2"),
            other => panic!("expected AnnounceReview, got {other:?}"),
        }
    }
}
