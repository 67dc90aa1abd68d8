//! API request and response types

use serde::{Deserialize, Serialize};

/// Request to create a new conversation
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional explicit slug; generated when absent
    #[serde(default)]
    pub slug: Option<String>,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Request to fork a conversation from a checkpoint
#[derive(Debug, Default, Deserialize)]
pub struct ForkRequest {
    #[serde(default)]
    pub slug: Option<String>,
}

/// Query parameters for checkpoint history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    20
}

/// Query parameters for catalog browsing
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// Response with a list of conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<serde_json::Value>,
}

/// Response with a single conversation plus its latest snapshot
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: serde_json::Value,
    pub transcript: Vec<serde_json::Value>,
    pub state: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_review: Option<serde_json::Value>,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

/// Response for a review decision
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub accepted: bool,
}

/// Summary row in checkpoint history (no transcript payload)
#[derive(Debug, Serialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub sequence_id: i64,
    pub state: serde_json::Value,
    pub message_count: usize,
    pub created_at: String,
}

/// Response with checkpoint history, most recent first
#[derive(Debug, Serialize)]
pub struct CheckpointListResponse {
    pub checkpoints: Vec<CheckpointSummary>,
}

/// Response with one full checkpoint
#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub checkpoint: serde_json::Value,
}

/// Response for a fork action
#[derive(Debug, Serialize)]
pub struct ForkResponse {
    pub conversation: serde_json::Value,
    pub checkpoint_id: String,
}

/// Response with catalog products
#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub products: Vec<serde_json::Value>,
}

/// Response with a conversation's cart
#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<serde_json::Value>,
    pub total_cents: i64,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
