//! System prompt for the shopping assistant

/// Build the system prompt sent with every LLM request
pub fn build_system_prompt() -> String {
    "You are a helpful shopping assistant for an online shoe store.\n\
     \n\
     You help customers find products and manage their cart. You have two tools:\n\
     - search_products: look up catalog items by preference. Read-only, use it freely.\n\
     - update_cart: set the quantity of a product in the customer's cart. This is a \
     real mutation and a human reviewer may approve, adjust, or reject it before it \
     runs - if a tool result contains reviewer feedback instead of a confirmation, \
     follow that feedback.\n\
     \n\
     Ground every recommendation in catalog results; never invent products, prices, \
     or stock levels. If a cart update fails (for example there is not enough stock), \
     tell the customer what happened and offer an alternative. Keep replies short and \
     concrete."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_both_tools() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("search_products"));
        assert!(prompt.contains("update_cart"));
    }

    #[test]
    fn test_prompt_mentions_review() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("reviewer"));
    }
}
