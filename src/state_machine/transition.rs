//! Pure state transition function
//!
//! One conversational turn: user message -> LLM invocation -> (answer | tool
//! calls -> review gate -> tool execution -> back to the LLM). The function
//! is pure - given the same inputs it always produces the same outputs, with
//! no I/O. All I/O is described by the returned effects.

use super::event::ReviewDecision;
use super::state::ToolCall;
use super::{ConvContext, ConvState, Effect, Event};
use crate::store::{ChatMessage, ErrorKind};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Assistant is busy, cannot accept a message right now")]
    AgentBusy,
    #[error("No review is pending for this conversation")]
    NoPendingReview,
    #[error("Conversation halted after an invariant violation and cannot continue")]
    ConversationHalted,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
#[allow(clippy::too_many_lines)] // The transition table reads best in one match
pub fn transition(
    state: &ConvState,
    _context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User Message Handling
        // ============================================================

        // Idle + UserMessage -> LlmRequesting
        (ConvState::Idle, Event::UserMessage { text }) => {
            Ok(start_turn(text))
        }

        // Error + UserMessage -> LlmRequesting (recovery), unless the error
        // was an invariant violation, which is fatal for the conversation
        (ConvState::Error { error_kind, .. }, Event::UserMessage { text }) => {
            if error_kind.is_fatal() {
                Err(TransitionError::ConversationHalted)
            } else {
                Ok(start_turn(text))
            }
        }

        // Busy states + UserMessage -> Reject
        (ConvState::LlmRequesting { .. }, Event::UserMessage { .. })
        | (ConvState::AwaitingReview { .. }, Event::UserMessage { .. })
        | (ConvState::ToolExecuting { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::AgentBusy)
        }

        // ============================================================
        // LLM Response Processing (routing decision)
        // ============================================================

        // LlmRequesting + LlmResponse without tools -> Idle (turn complete)
        (ConvState::LlmRequesting { .. }, Event::LlmResponse { text, tool_calls })
            if tool_calls.is_empty() =>
        {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::append(ChatMessage::assistant(text, vec![])))
                .with_effect(Effect::PersistCheckpoint)
                .with_effect(Effect::notify_agent_done()))
        }

        // LlmRequesting + LlmResponse with tools -> AwaitingReview.
        // Only the last call of the turn is surfaced for review; the rest
        // execute alongside it once a decision arrives.
        (ConvState::LlmRequesting { .. }, Event::LlmResponse { text, tool_calls }) => {
            let reviewed = tool_calls
                .last()
                .cloned()
                .ok_or_else(|| TransitionError::InvalidTransition("empty tool calls".into()))?;

            Ok(TransitionResult::new(ConvState::AwaitingReview {
                tool_calls: tool_calls.clone(),
            })
            .with_effect(Effect::append(ChatMessage::assistant(text, tool_calls)))
            .with_effect(Effect::PersistCheckpoint)
            .with_effect(Effect::request_review(reviewed)))
        }

        // ============================================================
        // Transport Errors and Retry
        // ============================================================

        // LlmRequesting + LlmError (retryable) -> LlmRequesting with incremented attempt
        (ConvState::LlmRequesting { attempt }, Event::LlmError { error_kind, .. })
            if error_kind.is_retryable() && *attempt < MAX_RETRY_ATTEMPTS =>
        {
            let new_attempt = attempt + 1;
            let delay = retry_delay(new_attempt);

            Ok(
                TransitionResult::new(ConvState::LlmRequesting { attempt: new_attempt })
                    .with_effect(Effect::PersistCheckpoint)
                    .with_effect(Effect::ScheduleRetry {
                        delay,
                        attempt: new_attempt,
                    })
                    .with_effect(Effect::notify_state_change(
                        "llm_requesting",
                        json!({
                            "attempt": new_attempt,
                            "max_attempts": MAX_RETRY_ATTEMPTS,
                            "message": format!("Retrying... (attempt {new_attempt})")
                        }),
                    )),
            )
        }

        // LlmRequesting + LlmError (non-retryable or exhausted) -> Error
        (ConvState::LlmRequesting { attempt }, Event::LlmError { message, error_kind, .. }) => {
            let error_message = if error_kind.is_retryable() {
                format!("Failed after {attempt} attempts: {message}")
            } else {
                message
            };

            Ok(TransitionResult::new(ConvState::Error {
                message: error_message.clone(),
                error_kind,
            })
            .with_effect(Effect::PersistCheckpoint)
            .with_effect(Effect::notify_state_change(
                "error",
                json!({ "message": error_message }),
            )))
        }

        // RetryTimeout -> re-issue the LLM request
        (ConvState::LlmRequesting { attempt }, Event::RetryTimeout { attempt: retry_attempt })
            if *attempt == retry_attempt =>
        {
            Ok(TransitionResult::new(ConvState::LlmRequesting { attempt: *attempt })
                .with_effect(Effect::RequestLlm))
        }

        // ============================================================
        // Human Review Gate
        // ============================================================

        (ConvState::AwaitingReview { tool_calls }, Event::Review { decision }) => {
            apply_review(tool_calls, decision)
        }

        // Review decisions only make sense while suspended
        (_, Event::Review { .. }) => Err(TransitionError::NoPendingReview),

        // ============================================================
        // Tool Execution
        // ============================================================

        // ToolExecuting + ToolComplete (more tools remaining) -> next tool
        (
            ConvState::ToolExecuting { current_tool, remaining_tools },
            Event::ToolComplete { tool_call_id, result },
        ) if tool_call_id == current_tool.id && !remaining_tools.is_empty() => {
            let next_tool = remaining_tools[0].clone();
            let new_remaining = remaining_tools[1..].to_vec();

            Ok(TransitionResult::new(ConvState::ToolExecuting {
                current_tool: next_tool.clone(),
                remaining_tools: new_remaining,
            })
            .with_effect(Effect::append(ChatMessage::tool(
                &current_tool.id,
                current_tool.name(),
                result.output,
            )))
            .with_effect(Effect::PersistCheckpoint)
            .with_effect(Effect::ExecuteTool { tool: next_tool }))
        }

        // ToolExecuting + ToolComplete (last tool) -> back to the LLM
        (
            ConvState::ToolExecuting { current_tool, remaining_tools },
            Event::ToolComplete { tool_call_id, result },
        ) if tool_call_id == current_tool.id && remaining_tools.is_empty() => {
            Ok(TransitionResult::new(ConvState::LlmRequesting { attempt: 1 })
                .with_effect(Effect::append(ChatMessage::tool(
                    &current_tool.id,
                    current_tool.name(),
                    result.output,
                )))
                .with_effect(Effect::PersistCheckpoint)
                .with_effect(Effect::RequestLlm))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with event {event:?}"
        ))),
    }
}

/// Start a new turn from a user message
fn start_turn(text: String) -> TransitionResult {
    TransitionResult::new(ConvState::LlmRequesting { attempt: 1 })
        .with_effect(Effect::append(ChatMessage::user(text)))
        .with_effect(Effect::PersistCheckpoint)
        .with_effect(Effect::RequestLlm)
}

/// Apply a review decision to the pending tool calls
fn apply_review(
    tool_calls: &[ToolCall],
    decision: ReviewDecision,
) -> Result<TransitionResult, TransitionError> {
    let Some(reviewed) = tool_calls.last() else {
        return Err(TransitionError::InvalidTransition(
            "awaiting review with no pending tool calls".into(),
        ));
    };

    match decision {
        ReviewDecision::Continue => Ok(execute_all(tool_calls.to_vec())),

        ReviewDecision::Update { tool_call_id, args } => {
            if tool_call_id != reviewed.id {
                return Ok(invariant_violation(&tool_call_id, &reviewed.id));
            }
            let mut updated = tool_calls.to_vec();
            let last = updated.len() - 1;
            updated[last] = reviewed.with_args(args);
            Ok(execute_all(updated))
        }

        ReviewDecision::Feedback { tool_call_id, text } => {
            if tool_call_id != reviewed.id {
                return Ok(invariant_violation(&tool_call_id, &reviewed.id));
            }

            // No tool runs. Every requested call must still be answered by a
            // tool-role message, in call order, to keep the transcript valid
            // for the model: the reviewed call carries the reviewer's text,
            // any earlier calls a not-executed note.
            let mut result = TransitionResult::new(ConvState::LlmRequesting { attempt: 1 });
            for call in tool_calls {
                let content = if call.id == reviewed.id {
                    text.clone()
                } else {
                    "Not executed: the reviewer replied before this call ran.".to_string()
                };
                result = result.with_effect(Effect::append(ChatMessage::tool(
                    &call.id,
                    call.name(),
                    content,
                )));
            }
            Ok(result
                .with_effect(Effect::PersistCheckpoint)
                .with_effect(Effect::RequestLlm))
        }
    }
}

/// Move into `ToolExecuting` over the full approved call list.
/// Callers have already established the list is non-empty.
fn execute_all(tool_calls: Vec<ToolCall>) -> TransitionResult {
    let first = tool_calls[0].clone();
    let remaining = tool_calls[1..].to_vec();
    TransitionResult::new(ConvState::ToolExecuting {
        current_tool: first.clone(),
        remaining_tools: remaining,
    })
    .with_effect(Effect::PersistCheckpoint)
    .with_effect(Effect::ExecuteTool { tool: first })
}

/// A review decision referenced a call id absent from the last assistant
/// message. Fatal for this conversation.
fn invariant_violation(got: &str, expected: &str) -> TransitionResult {
    let message = format!(
        "Review decision references tool call `{got}`, but the pending call is `{expected}`"
    );
    TransitionResult::new(ConvState::Error {
        message: message.clone(),
        error_kind: ErrorKind::InvariantViolation,
    })
    .with_effect(Effect::PersistCheckpoint)
    .with_effect(Effect::notify_state_change(
        "error",
        json!({ "message": message }),
    ))
}

fn retry_delay(attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s, 4s
    Duration::from_secs(1 << (attempt - 1))
}
