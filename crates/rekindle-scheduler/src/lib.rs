//! Periodic background work: the inactivity sweep that sends proactive
//! nudges, and the personality sweep that refreshes update suggestions.

pub mod sweep;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rekindle_config::AppConfig;
use rekindle_db::SessionStore;
use rekindle_llm::CompletionClient;
use tracing::{error, info};

pub use sweep::{SweepReport, run_inactivity_sweep, run_personality_sweep};

pub struct Scheduler {
    store: Arc<SessionStore>,
    llm: Option<Arc<dyn CompletionClient>>,
    config: AppConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<SessionStore>,
        llm: Option<Arc<dyn CompletionClient>>,
        config: AppConfig,
    ) -> Self {
        Self { store, llm, config }
    }

    fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs)
    }

    /// Spawn a background task that periodically checks quiet sessions and
    /// appends a proactive message where one is warranted.
    pub fn spawn_inactivity_sweep(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let period = Duration::from_secs(scheduler.config.engine.inactivity_sweep_minutes * 60);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match run_inactivity_sweep(
                    &scheduler.store,
                    scheduler.llm.as_deref(),
                    &scheduler.config.engine,
                    scheduler.llm_timeout(),
                    Utc::now(),
                )
                .await
                {
                    Ok(report) if report.acted > 0 => {
                        info!(
                            examined = report.examined,
                            nudged = report.acted,
                            conflicts = report.conflicts,
                            errors = report.errors,
                            "inactivity sweep complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("inactivity sweep failed: {e}"),
                }
            }
        });
    }

    /// Spawn a background task that periodically re-evaluates personality
    /// prompts for active sessions.
    pub fn spawn_personality_sweep(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let period = Duration::from_secs(scheduler.config.engine.personality_sweep_minutes * 60);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match run_personality_sweep(
                    &scheduler.store,
                    scheduler.llm.as_deref(),
                    &scheduler.config.engine,
                    scheduler.llm_timeout(),
                    Utc::now(),
                )
                .await
                {
                    Ok(report) if report.acted > 0 => {
                        info!(
                            examined = report.examined,
                            evaluated = report.acted,
                            conflicts = report.conflicts,
                            errors = report.errors,
                            "personality sweep complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("personality sweep failed: {e}"),
                }
            }
        });
    }

    pub fn spawn_all(self: &Arc<Self>) {
        self.spawn_inactivity_sweep();
        self.spawn_personality_sweep();
    }
}
