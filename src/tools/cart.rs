//! Cart mutation tool
//!
//! Set-semantics: the cart line is set to exactly the requested quantity,
//! with the existence check and stock reservation performed by the store in
//! one transaction. Retrying the same call after a crash changes nothing.

use super::{format_price, Tool, ToolContext, ToolOutput};
use crate::state_machine::state::CartUpdateInput;
use crate::store::{CartMutation, Store, StoreError};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct CartUpdateTool {
    store: Store,
}

impl CartUpdateTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CartUpdateTool {
    fn name(&self) -> &str {
        "update_cart"
    }

    fn description(&self) -> String {
        "Set the quantity of a product in the customer's cart. The quantity is the \
         desired total for that product, not an increment; 0 removes it. Use a product \
         id from search_products."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["product_id", "quantity"],
            "properties": {
                "product_id": {
                    "type": "string",
                    "description": "Catalog id of the product"
                },
                "quantity": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Desired line quantity (0 removes the line)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: CartUpdateInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let mutation =
            self.store
                .set_cart_quantity(&ctx.conversation_id, &input.product_id, input.quantity);

        match mutation {
            Ok(CartMutation::Applied { product, quantity }) => {
                if quantity == 0 {
                    ToolOutput::success(format!("Removed {} from the cart.", product.name))
                } else {
                    ToolOutput::success(format!(
                        "Cart updated: {quantity} x {} at {} each.",
                        product.name,
                        format_price(product.price_cents),
                    ))
                }
            }
            Ok(CartMutation::InsufficientStock { available, .. }) => {
                ToolOutput::error(format!("Not enough stock. Available: {available}"))
            }
            Err(StoreError::ProductNotFound(id)) => {
                ToolOutput::error(format!("Unknown product: {id}"))
            }
            Err(e) => ToolOutput::error(format!("Cart update failed: {e}")),
        }
    }
}
