//! Model registry for managing available LLM providers

use super::anthropic::AnthropicModel;
use super::{AnthropicService, LlmService, LoggingService};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for LLM providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    /// Gateway URL routing to the managed model endpoint
    pub gateway: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }
}

const ALL_MODELS: &[AnthropicModel] = &[
    AnthropicModel::Claude4Sonnet,
    AnthropicModel::Claude35Sonnet,
    AnthropicModel::Claude35Haiku,
];

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    /// Create an empty registry for testing purposes
    #[allow(dead_code)] // Used in tests
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: "test-model".to_string(),
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        // In gateway mode the gateway handles the actual authentication
        let api_key = if config.gateway.is_some() {
            Some("implicit".to_string())
        } else {
            config.anthropic_api_key.clone().filter(|k| !k.is_empty())
        };

        if let Some(key) = api_key {
            for model in ALL_MODELS {
                if let Ok(service) =
                    AnthropicService::new(key.clone(), *model, config.gateway.as_deref())
                {
                    services.insert(
                        model.model_id().to_string(),
                        Arc::new(LoggingService::new(Arc::new(service))),
                    );
                }
            }
        }

        let default_model = config
            .default_model
            .clone()
            .or_else(|| {
                if services.contains_key("claude-4-sonnet") {
                    Some("claude-4-sonnet".to_string())
                } else {
                    services.keys().next().cloned()
                }
            })
            .unwrap_or_else(|| "claude-4-sonnet".to_string());

        Self {
            services,
            default_model,
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_means_no_models() {
        let registry = ModelRegistry::new(&LlmConfig::default());
        assert!(!registry.has_models());
    }

    #[test]
    fn test_direct_mode_registers_models() {
        let config = LlmConfig {
            anthropic_api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        let registry = ModelRegistry::new(&config);
        assert!(registry.has_models());
        assert!(registry.get("claude-3.5-haiku").is_some());
        assert_eq!(registry.default_model_id(), "claude-4-sonnet");
    }

    #[test]
    fn test_default_model_override() {
        let config = LlmConfig {
            anthropic_api_key: Some("sk-test".to_string()),
            default_model: Some("claude-3.5-haiku".to_string()),
            ..LlmConfig::default()
        };
        let registry = ModelRegistry::new(&config);
        assert_eq!(registry.default_model_id(), "claude-3.5-haiku");
    }
}
