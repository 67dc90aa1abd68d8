//! Runtime for executing conversations
//!
//! One sequential driver per conversation id. Conversations share nothing
//! but the store; a conversation that is never resumed simply stays at its
//! last checkpoint.

mod executor;
mod recovery;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{tool_call_json, ConversationRuntime};
pub use traits::*;

use crate::llm::ModelRegistry;
use crate::state_machine::{ConvContext, Event};
use crate::store::Store;
use crate::tools::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Type alias for the production runtime with concrete implementations
pub type ProductionRuntime =
    ConversationRuntime<StoreCheckpoints, RegistryLlmClient, ToolRegistryExecutor>;

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        conversation: serde_json::Value,
        transcript: Vec<serde_json::Value>,
        state: serde_json::Value,
        /// Review payload if the conversation is suspended at the gate
        pending_review: Option<serde_json::Value>,
    },
    Message {
        message: serde_json::Value,
    },
    StateChange {
        state: serde_json::Value,
        /// Checkpoint written at this transition boundary, if any
        checkpoint_id: Option<String>,
    },
    ReviewRequested {
        question: String,
        tool_call: serde_json::Value,
    },
    AgentDone,
    Error {
        message: String,
    },
}

/// Handle to interact with a running conversation
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    store: Store,
    llm_registry: Arc<ModelRegistry>,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

impl RuntimeManager {
    pub fn new(store: Store, llm_registry: Arc<ModelRegistry>) -> Self {
        Self {
            store,
            llm_registry,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a runtime for a conversation, resuming it from its
    /// latest checkpoint.
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<ConversationHandle, String> {
        // Check if already running
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                return Ok(ConversationHandle {
                    event_tx: handle.event_tx.clone(),
                    broadcast_tx: handle.broadcast_tx.clone(),
                });
            }
        }

        // Need to start a new runtime
        let conv = self
            .store
            .get_conversation(conversation_id)
            .map_err(|e| e.to_string())?;

        let (state, transcript) = self
            .store
            .latest_checkpoint(&conv.id)
            .map_err(|e| e.to_string())?
            .map_or_else(Default::default, |c| (c.state, c.transcript));

        let context = ConvContext::new(&conv.id, self.llm_registry.default_model_id());

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);

        // Create production adapters
        let checkpoints = StoreCheckpoints::new(self.store.clone());
        let llm_client = RegistryLlmClient::new(
            self.llm_registry.clone(),
            self.llm_registry.default_model_id().to_string(),
        );
        let tool_executor = ToolRegistryExecutor::new(ToolRegistry::new(self.store.clone()));

        let runtime: ProductionRuntime = ConversationRuntime::new(
            context,
            state,
            transcript,
            checkpoints,
            llm_client,
            tool_executor,
            event_rx,
            event_tx.clone(),
            broadcast_tx.clone(),
        );

        // Start runtime in background
        let conv_id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(conv_id = %conv_id, "Conversation runtime finished");
        });

        let handle = ConversationHandle {
            event_tx: event_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
        };

        self.runtimes.write().await.insert(
            conversation_id.to_string(),
            ConversationHandle {
                event_tx,
                broadcast_tx,
            },
        );

        Ok(handle)
    }

    /// Send an event to a conversation
    pub async fn send_event(&self, conversation_id: &str, event: Event) -> Result<(), String> {
        let handle = self.get_or_create(conversation_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Subscribe to conversation updates
    pub async fn subscribe(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(conversation_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Get the store handle
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the LLM registry
    pub fn llm_registry(&self) -> &Arc<ModelRegistry> {
        &self.llm_registry
    }
}
