//! Mock implementations and full-turn integration tests
//!
//! These mocks enable driving the executor without real I/O.

use super::traits::{CheckpointStore, LlmClient, ToolExecutor};
use super::{ConversationRuntime, SseEvent};
use crate::llm::{
    ContentBlock, LlmError, LlmRequest, LlmResponse, ToolDefinition, Usage,
};
use crate::state_machine::{ConvContext, ConvState, Event};
use crate::store::{ChatMessage, Checkpoint};
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::invalid_request("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Build a plain-text mock response
pub fn text_response(text: impl Into<String>) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        end_turn: true,
        usage: Usage::default(),
    }
}

/// Build a mock response carrying one tool call
pub fn tool_response(id: &str, name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::tool_use(id, name, input)],
        end_turn: false,
        usage: Usage::default(),
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
pub struct MockToolExecutor {
    outputs: HashMap<String, ToolOutput>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            definitions: Vec::new(),
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Add a tool with a predefined output
    pub fn with_tool(mut self, name: impl Into<String>, output: ToolOutput) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self.outputs.insert(name, output);
        self
    }

    /// Get recorded executions
    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, _ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        self.outputs.get(name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// In-Memory Checkpoint Store
// ============================================================================

/// In-memory checkpoint store for testing
pub struct InMemoryCheckpoints {
    snapshots: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpoints {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// All snapshots for a conversation, oldest first
    pub fn all(&self, conversation_id: &str) -> Vec<Checkpoint> {
        self.snapshots
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Latest snapshot for a conversation
    pub fn latest_snapshot(&self, conversation_id: &str) -> Option<Checkpoint> {
        self.all(conversation_id).pop()
    }
}

impl Default for InMemoryCheckpoints {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpoints {
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConvState,
        transcript: &[ChatMessage],
    ) -> Result<Checkpoint, String> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let entries = snapshots.entry(conversation_id.to_string()).or_default();
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_id: i64::try_from(entries.len()).unwrap_or(i64::MAX) + 1,
            state: state.clone(),
            transcript: transcript.to_vec(),
            created_at: chrono::Utc::now(),
        };
        entries.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, String> {
        Ok(self.latest_snapshot(conversation_id))
    }
}

// ============================================================================
// Integration tests - full turns through the executor
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ReviewDecision;
    use crate::store::Role;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    struct Harness {
        event_tx: mpsc::Sender<Event>,
        rx: broadcast::Receiver<SseEvent>,
        checkpoints: Arc<InMemoryCheckpoints>,
        llm: Arc<MockLlmClient>,
        tools: Arc<MockToolExecutor>,
    }

    fn spawn_runtime(
        initial_state: ConvState,
        transcript: Vec<ChatMessage>,
        llm: Arc<MockLlmClient>,
        tools: Arc<MockToolExecutor>,
        checkpoints: Arc<InMemoryCheckpoints>,
    ) -> Harness {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, rx) = broadcast::channel(128);

        let runtime = ConversationRuntime::new(
            ConvContext::new("test-conv", "test-model"),
            initial_state,
            transcript,
            checkpoints.clone(),
            llm.clone(),
            tools.clone(),
            event_rx,
            event_tx.clone(),
            broadcast_tx,
        );
        tokio::spawn(runtime.run());

        Harness {
            event_tx,
            rx,
            checkpoints,
            llm,
            tools,
        }
    }

    fn fresh_harness() -> Harness {
        spawn_runtime(
            ConvState::Idle,
            vec![],
            Arc::new(MockLlmClient::new("test-model")),
            Arc::new(MockToolExecutor::new()),
            Arc::new(InMemoryCheckpoints::new()),
        )
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<SseEvent>, mut pred: F) -> SseEvent
    where
        F: FnMut(&SseEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("broadcast channel closed while waiting")
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn send_user(harness: &Harness, text: &str) {
        harness
            .event_tx
            .send(Event::UserMessage {
                text: text.to_string(),
            })
            .await
            .unwrap();
    }

    async fn send_review(harness: &Harness, decision: ReviewDecision) {
        harness
            .event_tx
            .send(Event::Review { decision })
            .await
            .unwrap();
    }

    fn roles(transcript: &[ChatMessage]) -> Vec<Role> {
        transcript.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_search_review_continue_full_turn() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(tool_response(
            "call-1",
            "search_products",
            json!({"preference": "running"}),
        ));
        llm.queue_response(text_response("I recommend the Trail Runner 5."));

        let tools = Arc::new(MockToolExecutor::new().with_tool(
            "search_products",
            ToolOutput::success("Trail Runner 5, Road Glide 3"),
        ));

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            tools,
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "search for running shoes").await;

        let review = wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;
        let SseEvent::ReviewRequested { tool_call, .. } = review else {
            unreachable!()
        };
        assert_eq!(tool_call["name"], "search_products");
        assert_eq!(tool_call["args"]["preference"], "running");

        send_review(&harness, ReviewDecision::Continue).await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        // The tool ran exactly once with the model's arguments
        let executions = harness.tools.recorded_executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].0, "search_products");
        assert_eq!(executions[0].1, json!({"preference": "running"}));

        // Final checkpoint: Idle, with the full turn in order
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        assert_eq!(latest.state, ConvState::Idle);
        assert_eq!(
            roles(&latest.transcript),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(
            latest.transcript[1].tool_calls[0].id.as_str(),
            latest.transcript[2].tool_call_id.as_deref().unwrap()
        );
        assert_eq!(
            latest.transcript[3].content,
            "I recommend the Trail Runner 5."
        );

        // The follow-up LLM request carried the tool result back
        let requests = harness.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages.iter().any(|m| m
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call-1"))));
    }

    #[tokio::test]
    async fn test_feedback_never_invokes_the_tool() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(tool_response(
            "call-1",
            "update_cart",
            json!({"product_id": "shoe-road-02", "quantity": 1}),
        ));
        llm.queue_response(text_response("Got it, which size do you need?"));

        let tools = Arc::new(
            MockToolExecutor::new().with_tool("update_cart", ToolOutput::success("Cart updated")),
        );

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            tools,
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "add the road shoes").await;
        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;

        send_review(
            &harness,
            ReviewDecision::Feedback {
                tool_call_id: "call-1".to_string(),
                text: "wrong size, use size 10".to_string(),
            },
        )
        .await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        // No mutation happened; the feedback rode back as the tool result
        assert!(harness.tools.recorded_executions().is_empty());
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        let tool_msg = latest
            .transcript
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "wrong size, use size 10");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(tool_msg.tool_name.as_deref(), Some("update_cart"));
    }

    #[tokio::test]
    async fn test_update_executes_with_replaced_args() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(tool_response(
            "call-1",
            "update_cart",
            json!({"product_id": "shoe-road-02", "quantity": 2}),
        ));
        llm.queue_response(text_response("Done, ten pairs in the cart."));

        let tools = Arc::new(
            MockToolExecutor::new().with_tool("update_cart", ToolOutput::success("Cart updated")),
        );

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            tools,
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "add two road shoes").await;
        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;

        send_review(
            &harness,
            ReviewDecision::Update {
                tool_call_id: "call-1".to_string(),
                args: json!({"product_id": "shoe-road-02", "quantity": 10}),
            },
        )
        .await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let executions = harness.tools.recorded_executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(
            executions[0].1,
            json!({"product_id": "shoe-road-02", "quantity": 10})
        );

        // The tool result still correlates with the original call id
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        let tool_msg = latest
            .transcript
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_data_not_fatal() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(tool_response(
            "call-1",
            "update_cart",
            json!({"product_id": "shoe-track-03", "quantity": 5}),
        ));
        llm.queue_response(text_response("Sorry, only 3 pairs are left."));

        let tools = Arc::new(MockToolExecutor::new().with_tool(
            "update_cart",
            ToolOutput::error("Not enough stock. Available: 3"),
        ));

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            tools,
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "add five spikes").await;
        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;
        send_review(&harness, ReviewDecision::Continue).await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        // The failure became tool-result content and the turn finished cleanly
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        assert_eq!(latest.state, ConvState::Idle);
        let tool_msg = latest
            .transcript
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert_eq!(tool_msg.content, "Not enough stock. Available: 3");
    }

    #[tokio::test]
    async fn test_review_suspension_survives_restart() {
        let checkpoints = Arc::new(InMemoryCheckpoints::new());

        // First process: get suspended at the review gate, then go away
        {
            let llm = Arc::new(MockLlmClient::new("test-model"));
            llm.queue_response(tool_response(
                "call-1",
                "search_products",
                json!({"preference": "running"}),
            ));
            let mut harness = spawn_runtime(
                ConvState::Idle,
                vec![],
                llm,
                Arc::new(MockToolExecutor::new()),
                checkpoints.clone(),
            );
            send_user(&harness, "search for running shoes").await;
            wait_for(&mut harness.rx, |e| {
                matches!(e, SseEvent::ReviewRequested { .. })
            })
            .await;
            // Dropping the harness drops event_tx; the runtime loop exits
        }

        let suspended = checkpoints.latest_snapshot("test-conv").unwrap();
        assert!(matches!(suspended.state, ConvState::AwaitingReview { .. }));
        let before_restart = suspended.transcript.clone();

        // Second process: resume from the checkpoint; the pending review is
        // re-announced, and the decision completes the turn.
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(text_response("The Trail Runner 5 fits best."));
        let tools = Arc::new(
            MockToolExecutor::new()
                .with_tool("search_products", ToolOutput::success("Trail Runner 5")),
        );
        let mut harness = spawn_runtime(
            suspended.state,
            suspended.transcript,
            llm,
            tools,
            checkpoints.clone(),
        );

        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;
        send_review(&harness, ReviewDecision::Continue).await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        // Replay law: the pre-restart transcript is an exact prefix
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        assert_eq!(latest.state, ConvState::Idle);
        assert_eq!(
            &latest.transcript[..before_restart.len()],
            before_restart.as_slice()
        );
        assert_eq!(harness.tools.recorded_executions().len(), 1);
    }

    #[tokio::test]
    async fn test_every_checkpoint_is_a_prefix_of_the_next() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_response(tool_response(
            "call-1",
            "search_products",
            json!({"preference": "running"}),
        ));
        llm.queue_response(text_response("Done."));
        let tools = Arc::new(
            MockToolExecutor::new()
                .with_tool("search_products", ToolOutput::success("matches")),
        );

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            tools,
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "search for running shoes").await;
        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;
        send_review(&harness, ReviewDecision::Continue).await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        let snapshots = harness.checkpoints.all("test-conv");
        assert!(snapshots.len() >= 4);
        for window in snapshots.windows(2) {
            let earlier = &window[0].transcript;
            let later = &window[1].transcript;
            assert!(later.len() >= earlier.len());
            assert_eq!(&later[..earlier.len()], earlier.as_slice());
        }
    }

    #[tokio::test]
    async fn test_user_message_rejected_while_suspended() {
        let call = crate::state_machine::state::ToolCall::new(
            "call-1",
            crate::state_machine::state::ToolInput::CatalogSearch(
                crate::state_machine::state::CatalogSearchInput {
                    preference: "running".to_string(),
                    max_results: None,
                },
            ),
        );
        let transcript = vec![
            ChatMessage::user("search"),
            ChatMessage::assistant("", vec![call.clone()]),
        ];

        let mut harness = spawn_runtime(
            ConvState::AwaitingReview {
                tool_calls: vec![call],
            },
            transcript,
            Arc::new(MockLlmClient::new("test-model")),
            Arc::new(MockToolExecutor::new()),
            Arc::new(InMemoryCheckpoints::new()),
        );

        // The suspension is re-announced on startup
        wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::ReviewRequested { .. })
        })
        .await;

        send_user(&harness, "never mind").await;
        let error = wait_for(&mut harness.rx, |e| matches!(e, SseEvent::Error { .. })).await;
        let SseEvent::Error { message } = error else {
            unreachable!()
        };
        assert!(message.contains("busy"));
    }

    #[tokio::test]
    async fn test_transport_error_retries_then_succeeds() {
        let llm = Arc::new(MockLlmClient::new("test-model"));
        llm.queue_error(LlmError::network("connection reset"));
        llm.queue_response(text_response("Hello!"));

        let mut harness = spawn_runtime(
            ConvState::Idle,
            vec![],
            llm,
            Arc::new(MockToolExecutor::new()),
            Arc::new(InMemoryCheckpoints::new()),
        );

        send_user(&harness, "hi").await;
        wait_for(&mut harness.rx, |e| matches!(e, SseEvent::AgentDone)).await;

        assert_eq!(harness.llm.recorded_requests().len(), 2);
        let latest = harness.checkpoints.latest_snapshot("test-conv").unwrap();
        assert_eq!(latest.state, ConvState::Idle);
        // No partial assistant message was appended for the failed attempt
        assert_eq!(
            roles(&latest.transcript),
            vec![Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_fresh_harness_reports_unqueued_llm_as_error_state() {
        let mut harness = fresh_harness();
        send_user(&harness, "hello").await;

        // Invalid-request errors are not retryable: the conversation parks
        // in the error state rather than looping.
        let change = wait_for(&mut harness.rx, |e| {
            matches!(e, SseEvent::StateChange { state, .. } if state["type"] == "error")
        })
        .await;
        let SseEvent::StateChange { state, .. } = change else {
            unreachable!()
        };
        assert_eq!(state["error_kind"], "invalid_request");
    }
}
