//! Store schema and record types

pub use crate::state_machine::state::ConvState;
use crate::state_machine::state::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    slug TEXT UNIQUE,
    parent_conversation_id TEXT,
    forked_from_checkpoint TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (parent_conversation_id)
        REFERENCES conversations(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_slug ON conversations(slug);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    transcript TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (conversation_id, sequence_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_conversation
    ON checkpoints(conversation_id, sequence_id DESC);

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    category TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    stock INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cart_items (
    conversation_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,

    UNIQUE (conversation_id, product_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (product_id) REFERENCES products(id)
);
"#;

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub slug: Option<String>,
    pub parent_conversation_id: Option<String>,
    pub forked_from_checkpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable snapshot of dialogue state plus driver state, one per
/// state-machine transition boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub conversation_id: String,
    pub sequence_id: i64,
    pub state: ConvState,
    pub transcript: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// Dialogue messages
// ============================================================

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One conversational turn in the dialogue transcript.
///
/// A tool-role message's `tool_call_id` always matches an identifier emitted
/// by a preceding assistant message's `tool_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }
}

// ============================================================
// Tool results and error classification
// ============================================================

/// Tool execution result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn success(tool_call_id: String, output: String) -> Self {
        Self {
            tool_call_id,
            success: true,
            output,
        }
    }

    pub fn failure(tool_call_id: String, output: String) -> Self {
        Self {
            tool_call_id,
            success: false,
            output,
        }
    }
}

/// Error classification, persisted in checkpointed error states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimit,
    Network,
    ServerError,
    InvalidRequest,
    InvariantViolation,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }

    /// Fatal kinds poison the conversation - no recovery on the next user
    /// message.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::InvariantViolation)
    }
}

// ============================================================
// Shop records
// ============================================================

/// Catalog product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub stock: u32,
}

/// One cart line, joined with its product for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price_cents: i64,
}

/// Outcome of a cart mutation. Insufficient stock is data, not an error -
/// the model needs to see it to react.
#[derive(Debug, Clone, PartialEq)]
pub enum CartMutation {
    Applied { product: Product, quantity: u32 },
    InsufficientStock { product: Product, available: u32 },
}

/// Catalog seeded into an empty store at startup
pub fn default_catalog() -> Vec<Product> {
    let product = |id: &str, name: &str, description: &str, category: &str, price_cents: i64, stock: u32| Product {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        price_cents,
        stock,
    };

    vec![
        product(
            "shoe-trail-01",
            "Trail Runner 5",
            "Cushioned trail running shoe with an aggressive tread",
            "running",
            12995,
            12,
        ),
        product(
            "shoe-road-02",
            "Road Glide 3",
            "Lightweight road running shoe for daily mileage",
            "running",
            10950,
            8,
        ),
        product(
            "shoe-track-03",
            "Sprint Spike X",
            "Track racing spike for short distances",
            "running",
            8999,
            3,
        ),
        product(
            "shoe-walk-04",
            "CloudStep Walker",
            "Soft walking shoe with memory-foam insole",
            "walking",
            7900,
            15,
        ),
        product(
            "shoe-casual-05",
            "Canvas High-Top",
            "Classic canvas sneaker in bold colors",
            "casual",
            5995,
            20,
        ),
        product(
            "shoe-dress-06",
            "Leather Oxford",
            "Full-grain leather oxford for formal wear",
            "dress",
            14900,
            6,
        ),
        product(
            "shoe-hike-07",
            "Ridge Hiking Boot",
            "Waterproof boot with ankle support for rough terrain",
            "hiking",
            15975,
            9,
        ),
        product(
            "shoe-sandal-08",
            "Shoreline Sandal",
            "Quick-dry strap sandal for the beach",
            "sandals",
            3999,
            25,
        ),
    ]
}
