//! Catalog search tool - read-only product lookup

use super::{format_price, Tool, ToolContext, ToolOutput};
use crate::state_machine::state::CatalogSearchInput;
use crate::store::Store;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write;

const DEFAULT_MAX_RESULTS: u32 = 5;

pub struct CatalogSearchTool {
    store: Store,
}

impl CatalogSearchTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CatalogSearchTool {
    fn name(&self) -> &str {
        "search_products"
    }

    fn description(&self) -> String {
        "Search the shop catalog by preference (e.g. \"running\", \"waterproof\", \"sandals\"). \
         Returns matching products with id, price, and available stock. Read-only."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["preference"],
            "properties": {
                "preference": {
                    "type": "string",
                    "description": "What the customer is looking for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Cap on the number of results (default 5)"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> ToolOutput {
        let input: CatalogSearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let limit = input.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let products = match self.store.search_products(&input.preference, limit) {
            Ok(p) => p,
            Err(e) => return ToolOutput::error(format!("Catalog lookup failed: {e}")),
        };

        if products.is_empty() {
            return ToolOutput::success(format!(
                "No products matched \"{}\".",
                input.preference
            ));
        }

        let mut output = format!(
            "{} product(s) matched \"{}\":\n",
            products.len(),
            input.preference
        );
        for product in &products {
            let _ = writeln!(
                output,
                "- {} [{}] {} ({} in stock): {}",
                product.name,
                product.id,
                format_price(product.price_cents),
                product.stock,
                product.description,
            );
        }
        ToolOutput::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::default_catalog;

    fn tool() -> CatalogSearchTool {
        let store = Store::open_in_memory().unwrap();
        store.seed_products(&default_catalog()).unwrap();
        CatalogSearchTool::new(store)
    }

    fn ctx() -> ToolContext {
        ToolContext::new("test-conv")
    }

    #[tokio::test]
    async fn test_search_finds_running_shoes() {
        let result = tool()
            .run(json!({"preference": "running"}), ctx())
            .await;
        assert!(result.success);
        assert!(result.output.contains("Trail Runner 5"));
        assert!(result.output.contains("shoe-road-02"));
    }

    #[tokio::test]
    async fn test_search_respects_max_results() {
        let result = tool()
            .run(json!({"preference": "running", "max_results": 1}), ctx())
            .await;
        assert!(result.success);
        assert!(result.output.starts_with("1 product(s)"));
    }

    #[tokio::test]
    async fn test_no_matches_is_still_success() {
        let result = tool()
            .run(json!({"preference": "snowboard"}), ctx())
            .await;
        assert!(result.success);
        assert!(result.output.contains("No products matched"));
    }

    #[tokio::test]
    async fn test_missing_preference_is_tool_failure() {
        let result = tool().run(json!({}), ctx()).await;
        assert!(!result.success);
        assert!(result.output.contains("Invalid input"));
    }
}
