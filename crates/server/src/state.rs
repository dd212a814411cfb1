//! Application state shared across handlers.

use crate::engine::VoteToggleEngine;
use crate::query::VoteQueryService;
use std::sync::Arc;
use vigil_core::config::AppConfig;
use vigil_metadata::MetadataStore;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Vote writer.
    pub engine: Arc<VoteToggleEngine>,
    /// Vote readers.
    pub queries: Arc<VoteQueryService>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        let engine = VoteToggleEngine::new(metadata.clone(), config.votes.clone());
        let queries = VoteQueryService::new(metadata.clone());
        Self {
            config: Arc::new(config),
            metadata,
            engine: Arc::new(engine),
            queries: Arc::new(queries),
        }
    }
}
