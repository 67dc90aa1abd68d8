//! Conversation runtime executor
//!
//! Sequential driver for one conversation: receives events, applies the pure
//! transition function, and executes the resulting effects. LLM requests and
//! tool executions run as background tasks that send completion events back
//! into the loop, so no two steps of one conversation ever run concurrently.

use super::recovery::{self, ResumeAction};
use super::traits::{CheckpointStore, LlmClient, ToolExecutor};
use super::SseEvent;
use crate::llm::{ContentBlock, LlmMessage, LlmRequest, MessageRole, SystemContent};
use crate::state_machine::state::{ToolCall, ToolInput};
use crate::state_machine::{transition, ConvContext, ConvState, Effect, Event};
use crate::store::{ChatMessage, ErrorKind, Role, ToolResult};
use crate::system_prompt::build_system_prompt;
use crate::tools::ToolContext;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Generic conversation runtime over any storage, LLM, and tool implementations
pub struct ConversationRuntime<S, L, T>
where
    S: CheckpointStore + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    context: ConvContext,
    state: ConvState,
    /// Dialogue state, owned by this driver for the duration of each turn
    transcript: Vec<ChatMessage>,
    checkpoints: S,
    llm_client: Arc<L>,
    tool_executor: Arc<T>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
}

impl<S, L, T> ConversationRuntime<S, L, T>
where
    S: CheckpointStore + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ConvContext,
        state: ConvState,
        transcript: Vec<ChatMessage>,
        checkpoints: S,
        llm_client: L,
        tool_executor: T,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            context,
            state,
            transcript,
            checkpoints,
            llm_client: Arc::new(llm_client),
            tool_executor: Arc::new(tool_executor),
            event_rx,
            event_tx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.context.conversation_id, "Starting conversation runtime");

        // Handle resumption from the checkpointed state: re-drive whatever
        // was interrupted, or re-announce a durable review suspension.
        match recovery::resume_action(&self.state) {
            ResumeAction::Wait => {}
            ResumeAction::ReissueLlm => {
                tracing::info!(conv_id = %self.context.conversation_id, "Resuming interrupted LLM request");
                if let Err(e) = self.execute_effect(Effect::RequestLlm).await {
                    self.report_error(&e);
                }
            }
            ResumeAction::ReexecuteTool(tool) => {
                tracing::info!(conv_id = %self.context.conversation_id, tool = %tool.name(), "Re-executing interrupted tool");
                if let Err(e) = self.execute_effect(Effect::ExecuteTool { tool }).await {
                    self.report_error(&e);
                }
            }
            ResumeAction::AnnounceReview { question, tool } => {
                tracing::info!(conv_id = %self.context.conversation_id, tool = %tool.name(), "Re-announcing pending review");
                let _ = self.broadcast_tx.send(SseEvent::ReviewRequested {
                    question,
                    tool_call: tool_call_json(&tool),
                });
            }
        }

        while let Some(event) = self.event_rx.recv().await {
            if let Err(e) = self.process_event(event).await {
                tracing::error!(error = %e, "Error handling event");
            }
        }

        tracing::info!(conv_id = %self.context.conversation_id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                // Transition errors are user-facing (e.g. "assistant is busy")
                self.report_error(&e.to_string());
                return Err(e.to_string());
            }
        };

        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect).await?;
        }

        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) -> Result<(), String> {
        match effect {
            Effect::AppendMessage { message } => {
                let msg_json = serde_json::to_value(&message).unwrap_or(Value::Null);
                self.transcript.push(message);
                let _ = self.broadcast_tx.send(SseEvent::Message { message: msg_json });
                Ok(())
            }

            Effect::PersistCheckpoint => {
                let checkpoint = self
                    .checkpoints
                    .save(&self.context.conversation_id, &self.state, &self.transcript)
                    .await?;

                let state_json = serde_json::to_value(&self.state).unwrap_or(Value::Null);
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    state: state_json,
                    checkpoint_id: Some(checkpoint.id),
                });
                Ok(())
            }

            Effect::RequestLlm => {
                let llm_client = self.llm_client.clone();
                let event_tx = self.event_tx.clone();
                let messages = build_llm_messages(&self.transcript);
                let tools = self.tool_executor.definitions();
                let system_prompt = build_system_prompt();
                let current_attempt = match &self.state {
                    ConvState::LlmRequesting { attempt } => *attempt,
                    _ => 1,
                };

                tokio::spawn(async move {
                    tracing::info!(attempt = current_attempt, "Making LLM request (background)");

                    let request = LlmRequest {
                        system: vec![SystemContent::cached(&system_prompt)],
                        messages,
                        tools,
                        max_tokens: Some(1024),
                    };

                    let event = match llm_client.complete(&request).await {
                        Ok(response) => {
                            let tool_calls: Vec<ToolCall> = response
                                .tool_uses()
                                .into_iter()
                                .map(|(id, name, input)| {
                                    ToolCall::new(
                                        id.to_string(),
                                        ToolInput::from_name_and_value(name, input.clone()),
                                    )
                                })
                                .collect();

                            Event::LlmResponse {
                                text: response.text(),
                                tool_calls,
                            }
                        }
                        Err(e) => Event::LlmError {
                            message: e.message.clone(),
                            error_kind: llm_error_to_kind(e.kind),
                            attempt: current_attempt,
                        },
                    };
                    let _ = event_tx.send(event).await;
                });

                Ok(())
            }

            Effect::ExecuteTool { tool } => {
                let tool_executor = self.tool_executor.clone();
                let event_tx = self.event_tx.clone();
                let ctx = ToolContext::new(self.context.conversation_id.clone());
                let tool_call_id = tool.id.clone();
                let tool_name = tool.name().to_string();
                let tool_input = tool.input.to_value();

                tokio::spawn(async move {
                    tracing::info!(tool = %tool_name, id = %tool_call_id, "Executing tool (background)");

                    let output = tool_executor.execute(&tool_name, tool_input, ctx).await;

                    // An unregistered tool name is a failure result, not a
                    // fatal error - the model has to see it to recover.
                    let result = match output {
                        Some(out) if out.success => {
                            ToolResult::success(tool_call_id.clone(), out.output)
                        }
                        Some(out) => ToolResult::failure(tool_call_id.clone(), out.output),
                        None => ToolResult::failure(
                            tool_call_id.clone(),
                            format!("Unknown tool: {tool_name}"),
                        ),
                    };
                    let _ = event_tx
                        .send(Event::ToolComplete {
                            tool_call_id,
                            result,
                        })
                        .await;
                });

                Ok(())
            }

            Effect::RequestReview { question, tool } => {
                tracing::info!(
                    conv_id = %self.context.conversation_id,
                    tool = %tool.name(),
                    id = %tool.id,
                    "Suspending for human review"
                );
                let _ = self.broadcast_tx.send(SseEvent::ReviewRequested {
                    question,
                    tool_call: tool_call_json(&tool),
                });
                Ok(())
            }

            Effect::ScheduleRetry { delay, attempt } => {
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = event_tx.send(Event::RetryTimeout { attempt }).await;
                });
                Ok(())
            }

            Effect::NotifyClient { event_type, data } => {
                match event_type.as_str() {
                    "agent_done" => {
                        let _ = self.broadcast_tx.send(SseEvent::AgentDone);
                    }
                    "state_change" => {
                        let _ = self.broadcast_tx.send(SseEvent::StateChange {
                            state: data,
                            checkpoint_id: None,
                        });
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    fn report_error(&self, message: &str) {
        let _ = self.broadcast_tx.send(SseEvent::Error {
            message: message.to_string(),
        });
    }
}

/// Review payload representation of a pending tool call - the reviewer sees
/// the exact call and arguments that would execute.
pub fn tool_call_json(tool: &ToolCall) -> Value {
    json!({
        "id": tool.id,
        "name": tool.name(),
        "args": tool.input.to_value(),
    })
}

/// Map the dialogue transcript to LLM wire messages. Tool results ride as
/// `tool_result` blocks in user-role messages; assistant tool calls become
/// `tool_use` blocks.
pub fn build_llm_messages(transcript: &[ChatMessage]) -> Vec<LlmMessage> {
    let mut messages = Vec::new();

    for msg in transcript {
        match msg.role {
            Role::User => {
                messages.push(LlmMessage {
                    role: MessageRole::User,
                    content: vec![ContentBlock::text(&msg.content)],
                });
            }
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(ContentBlock::text(&msg.content));
                }
                for call in &msg.tool_calls {
                    content.push(ContentBlock::tool_use(
                        &call.id,
                        call.name(),
                        call.input.to_value(),
                    ));
                }
                messages.push(LlmMessage {
                    role: MessageRole::Assistant,
                    content,
                });
            }
            Role::Tool => {
                let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
                messages.push(LlmMessage {
                    role: MessageRole::User,
                    content: vec![ContentBlock::tool_result(tool_call_id, &msg.content, false)],
                });
            }
        }
    }

    messages
}

fn llm_error_to_kind(kind: crate::llm::LlmErrorKind) -> ErrorKind {
    // Explicit match arms so new error kinds are handled (no catch-all)
    match kind {
        crate::llm::LlmErrorKind::Auth => ErrorKind::Auth,
        crate::llm::LlmErrorKind::RateLimit => ErrorKind::RateLimit,
        crate::llm::LlmErrorKind::Network => ErrorKind::Network,
        crate::llm::LlmErrorKind::ServerError => ErrorKind::ServerError,
        crate::llm::LlmErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
        crate::llm::LlmErrorKind::Unknown => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;
    use crate::state_machine::state::{CatalogSearchInput, ToolInput};

    #[test]
    fn test_llm_error_mapping_keeps_retryability() {
        assert_eq!(llm_error_to_kind(LlmErrorKind::Auth), ErrorKind::Auth);
        assert_eq!(
            llm_error_to_kind(LlmErrorKind::RateLimit),
            ErrorKind::RateLimit
        );
        assert_eq!(llm_error_to_kind(LlmErrorKind::Network), ErrorKind::Network);
        assert_eq!(
            llm_error_to_kind(LlmErrorKind::ServerError),
            ErrorKind::ServerError
        );
        assert!(llm_error_to_kind(LlmErrorKind::ServerError).is_retryable());
        assert!(!llm_error_to_kind(LlmErrorKind::InvalidRequest).is_retryable());
    }

    #[test]
    fn test_build_llm_messages_wire_mapping() {
        let call = ToolCall::new(
            "call-1",
            ToolInput::CatalogSearch(CatalogSearchInput {
                preference: "running".to_string(),
                max_results: None,
            }),
        );
        let transcript = vec![
            ChatMessage::user("search for running shoes"),
            ChatMessage::assistant("", vec![call]),
            ChatMessage::tool("call-1", "search_products", "2 matches"),
            ChatMessage::assistant("Here you go", vec![]),
        ];

        let messages = build_llm_messages(&transcript);
        assert_eq!(messages.len(), 4);

        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(matches!(
            messages[1].content[0],
            ContentBlock::ToolUse { .. }
        ));
        // Tool results go back in a user-role message
        assert_eq!(messages[2].role, MessageRole::User);
        assert!(matches!(
            &messages[2].content[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call-1"
        ));
        assert_eq!(messages[3].role, MessageRole::Assistant);
    }

    #[test]
    fn test_empty_assistant_text_not_sent_as_block() {
        let call = ToolCall::new(
            "call-1",
            ToolInput::CatalogSearch(CatalogSearchInput {
                preference: "x".to_string(),
                max_results: None,
            }),
        );
        let messages = build_llm_messages(&[ChatMessage::assistant("", vec![call])]);
        assert_eq!(messages[0].content.len(), 1);
        assert!(matches!(
            messages[0].content[0],
            ContentBlock::ToolUse { .. }
        ));
    }
}
