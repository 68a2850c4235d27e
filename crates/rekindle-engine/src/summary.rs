//! Rolling conversation summaries, refreshed every few messages.

use std::time::Duration;

use rekindle_common::{ChatTurn, Error, Result};
use rekindle_config::EngineConfig;
use rekindle_llm::{CompletionClient, CompletionRequest, prompts};
use tracing::debug;

/// A summary refresh is due on every Nth message.
pub fn summary_due(message_count: u64, config: &EngineConfig) -> bool {
    let interval = config.summary_interval.max(1);
    message_count > 0 && message_count % interval == 0
}

/// Ask the model to fold recent turns into the existing summary. Unlike the
/// decision paths there is no deterministic fallback; callers keep the old
/// summary when this fails.
pub async fn generate_summary(
    turns: &[ChatTurn],
    existing: Option<&str>,
    llm: &dyn CompletionClient,
    llm_timeout: Duration,
) -> Result<String> {
    let prompt = prompts::summary_prompt(existing, turns);

    let text = tokio::time::timeout(llm_timeout, llm.complete(&CompletionRequest::prompt(prompt)))
        .await
        .map_err(|_| Error::Analysis("summary generation timed out".to_string()))??;

    let summary = text.trim().to_string();
    debug!(chars = summary.len(), "summary refreshed");
    Ok(summary)
}
