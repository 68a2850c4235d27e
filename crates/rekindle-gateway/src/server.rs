use std::sync::Arc;

use rekindle_common::Result;
use rekindle_config::{AppConfig, ConfigLoader};
use rekindle_db::SessionStore;
use rekindle_llm::OpenAiClient;
use rekindle_scheduler::Scheduler;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::router::build_router;
use crate::state::AppState;

/// The main gateway server that binds to a port and serves the API.
pub struct GatewayServer {
    config: AppConfig,
    loader: ConfigLoader,
}

impl GatewayServer {
    pub fn new(config: AppConfig, loader: ConfigLoader) -> Self {
        Self { config, loader }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);

        self.loader.ensure_dirs()?;
        let db_path = self.loader.database_path(&self.config);
        let store = Arc::new(SessionStore::open(&db_path)?);

        let llm = OpenAiClient::from_config(&self.config.llm)?;
        if llm.is_none() {
            warn!("no OpenAI API key configured, decision paths use deterministic fallbacks");
        }

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            llm.clone(),
            self.config.clone(),
        ));
        scheduler.spawn_all();

        let state = Arc::new(AppState::new(self.config, store, llm));
        let app = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("Rekindle gateway listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| rekindle_common::Error::Gateway(format!("server error: {e}")))?;

        Ok(())
    }
}
