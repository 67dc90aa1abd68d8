//! Tool implementations for the shopping assistant
//!
//! The registered set is exactly two capabilities: a read-only catalog
//! search and a side-effecting cart mutation. Tool failures of every kind
//! are returned as output values - the model has to see them to react.

mod cart;
mod catalog;

pub use cart::CartUpdateTool;
pub use catalog::CatalogSearchTool;

use crate::store::Store;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Per-invocation context handed to a tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Carts are scoped per conversation
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
        }
    }
}

/// Trait for tools the assistant can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// The capability set available to a conversation, resolved once at startup
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(store: Store) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(CatalogSearchTool::new(store.clone())),
            Arc::new(CartUpdateTool::new(store)),
        ];
        Self { tools }
    }

    /// Get all tool definitions for the LLM
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}

/// Format cents as a dollar amount
pub(crate) fn format_price(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents.rem_euclid(100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::default_catalog;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_has_exactly_two_tools() {
        let store = Store::open_in_memory().unwrap();
        let registry = ToolRegistry::new(store);
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["search_products", "update_cart"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_none() {
        let store = Store::open_in_memory().unwrap();
        store.seed_products(&default_catalog()).unwrap();
        let registry = ToolRegistry::new(store);
        let result = registry
            .execute("no_such_tool", json!({}), ToolContext::new("conv-1"))
            .await;
        assert!(result.is_none());
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(12995), "$129.95");
        assert_eq!(format_price(500), "$5.00");
        assert_eq!(format_price(7), "$0.07");
    }
}
