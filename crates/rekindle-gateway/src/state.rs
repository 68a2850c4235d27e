use std::sync::Arc;
use std::time::Duration;

use rekindle_config::AppConfig;
use rekindle_db::SessionStore;
use rekindle_llm::CompletionClient;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SessionStore>,
    pub llm: Option<Arc<dyn CompletionClient>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<SessionStore>,
        llm: Option<Arc<dyn CompletionClient>>,
    ) -> Self {
        Self { config, store, llm }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs)
    }
}
