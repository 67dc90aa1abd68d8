//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations. The
//! driver treats the checkpoint store purely as put/get-latest; history and
//! forking are served straight from the store by the API layer.

use crate::llm::{LlmError, LlmRequest, LlmResponse};
use crate::state_machine::ConvState;
use crate::store::{ChatMessage, Checkpoint};
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;

/// Durable storage for conversation snapshots
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a snapshot of the dialogue state plus driver state
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConvState,
        transcript: &[ChatMessage],
    ) -> Result<Checkpoint, String>;

    /// Fetch the most recent snapshot, if any
    async fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    #[allow(dead_code)] // API completeness
    fn model_id(&self) -> &str;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name; `None` means the name is not registered
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput>;

    /// Get tool definitions for the LLM
    fn definitions(&self) -> Vec<crate::llm::ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

use std::sync::Arc;

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConvState,
        transcript: &[ChatMessage],
    ) -> Result<Checkpoint, String> {
        (**self).save(conversation_id, state, transcript).await
    }

    async fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, String> {
        (**self).latest(conversation_id).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::llm::ModelRegistry;
use crate::store::Store;
use crate::tools::ToolRegistry;

/// Adapter to use the sqlite `Store` as a `CheckpointStore`
#[derive(Clone)]
pub struct StoreCheckpoints {
    store: Store,
}

impl StoreCheckpoints {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckpointStore for StoreCheckpoints {
    async fn save(
        &self,
        conversation_id: &str,
        state: &ConvState,
        transcript: &[ChatMessage],
    ) -> Result<Checkpoint, String> {
        self.store
            .append_checkpoint(conversation_id, state, transcript)
            .map_err(|e| e.to_string())
    }

    async fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, String> {
        self.store
            .latest_checkpoint(conversation_id)
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use the `ModelRegistry` as an `LlmClient`
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::network("No LLM available"))?;
        llm.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Adapter to use the `ToolRegistry` as a `ToolExecutor`
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.registry.definitions()
    }
}
