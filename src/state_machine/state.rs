//! Conversation state types

use crate::store::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Tool Input Types - Strongly typed inputs for each tool
// ============================================================================

/// Input for the `search_products` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSearchInput {
    pub preference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

/// Input for the `update_cart` tool
///
/// `quantity` is the desired line quantity, not a delta. Setting it to 0
/// removes the line. Retrying the same call is therefore a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartUpdateInput {
    pub product_id: String,
    pub quantity: u32,
}

/// Strongly typed tool input enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tool", rename_all = "snake_case")]
pub enum ToolInput {
    CatalogSearch(CatalogSearchInput),
    CartUpdate(CartUpdateInput),
    /// Fallback for unknown tools or parsing failures
    Unknown {
        name: String,
        input: Value,
    },
}

impl ToolInput {
    /// Get the tool name
    pub fn tool_name(&self) -> &str {
        match self {
            ToolInput::CatalogSearch(_) => "search_products",
            ToolInput::CartUpdate(_) => "update_cart",
            ToolInput::Unknown { name, .. } => name,
        }
    }

    /// Convert to JSON Value for tool execution
    pub fn to_value(&self) -> Value {
        match self {
            ToolInput::CatalogSearch(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::CartUpdate(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::Unknown { input, .. } => input.clone(),
        }
    }

    /// Parse from tool name and JSON value
    pub fn from_name_and_value(name: &str, value: Value) -> Self {
        match name {
            "search_products" => serde_json::from_value(value.clone()).map_or_else(
                |_| ToolInput::Unknown {
                    name: name.to_string(),
                    input: value,
                },
                ToolInput::CatalogSearch,
            ),
            "update_cart" => serde_json::from_value(value.clone()).map_or_else(
                |_| ToolInput::Unknown {
                    name: name.to_string(),
                    input: value,
                },
                ToolInput::CartUpdate,
            ),
            _ => ToolInput::Unknown {
                name: name.to_string(),
                input: value,
            },
        }
    }
}

// ============================================================================
// Tool Call - A tool invocation with ID and typed input
// ============================================================================

/// A tool call from the LLM with typed input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub input: ToolInput,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            input,
        }
    }

    /// Get the tool name
    pub fn name(&self) -> &str {
        self.input.tool_name()
    }

    /// Rebuild this call with a replacement argument mapping.
    ///
    /// Identifier and tool name are preserved so the downstream tool-result
    /// message still correlates; only the arguments change. Arguments that
    /// fail to parse for this tool fall back to `ToolInput::Unknown` under
    /// the same name, which the executor reports as a tool failure.
    pub fn with_args(&self, args: Value) -> ToolCall {
        ToolCall {
            id: self.id.clone(),
            input: ToolInput::from_name_and_value(self.name(), args),
        }
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Turn complete, ready for the next user message
    #[default]
    Idle,

    /// LLM request in flight, with retry tracking
    LlmRequesting { attempt: u32 },

    /// Suspended awaiting a human review decision on the pending tool calls.
    /// Only the last call in the list is surfaced for review; the rest ride
    /// along and execute with it.
    AwaitingReview { tool_calls: Vec<ToolCall> },

    /// Executing approved tools serially
    ToolExecuting {
        current_tool: ToolCall,
        remaining_tools: Vec<ToolCall>,
    },

    /// Error occurred - surfaced to clients directly
    Error {
        message: String,
        error_kind: ErrorKind,
    },
}

impl ConvState {
    /// The tool call currently subject to review, if any
    pub fn pending_review(&self) -> Option<&ToolCall> {
        match self {
            ConvState::AwaitingReview { tool_calls } => tool_calls.last(),
            _ => None,
        }
    }

    /// Check if the assistant is currently working
    pub fn is_working(&self) -> bool {
        !matches!(self, ConvState::Idle | ConvState::Error { .. })
    }
}

/// Context for a conversation (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub conversation_id: String,
    #[allow(dead_code)] // Used by LLM client selection
    pub model_id: String,
}

impl ConvContext {
    pub fn new(conversation_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            model_id: model_id.into(),
        }
    }
}
