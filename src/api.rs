//! HTTP API for the shopping-assistant backend

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::llm::ModelRegistry;
use crate::runtime::RuntimeManager;
use crate::store::Store;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
}

impl AppState {
    pub fn new(store: Store, llm_registry: Arc<ModelRegistry>) -> Self {
        Self {
            runtime: Arc::new(RuntimeManager::new(store, llm_registry)),
        }
    }
}
