use std::time::Duration;

use chrono::{DateTime, Utc};
use rekindle_config::EngineConfig;
use rekindle_llm::{CompletionClient, CompletionRequest, prompts};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivityAction {
    None,
    Continue,
    NewTopic,
}

impl InactivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Continue => "continue",
            Self::NewTopic => "new_topic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactivityDecision {
    pub action: InactivityAction,
    pub reason: String,
    pub suggested_message: Option<String>,
}

impl InactivityDecision {
    fn none(reason: impl Into<String>) -> Self {
        Self {
            action: InactivityAction::None,
            reason: reason.into(),
            suggested_message: None,
        }
    }
}

const CONTINUE_TEMPLATE: &str =
    "Hey, I was thinking about what we discussed earlier. Want to pick it up where we left off?";
const NEW_TOPIC_TEMPLATE: &str =
    "It's been a while since we talked. Is there anything new you'd like to chat about?";

/// Decide whether a quiet session deserves a proactive nudge. Never fails:
/// LLM trouble degrades to the deterministic time-bucket rule. Message
/// insertion and state persistence are the caller's responsibility.
pub async fn decide_inactivity(
    snapshot: &SessionSnapshot,
    config: &EngineConfig,
    llm: Option<&dyn CompletionClient>,
    llm_timeout: Duration,
    now: DateTime<Utc>,
) -> InactivityDecision {
    let Some(last_activity) = snapshot.last_activity_at else {
        return InactivityDecision::none("no recorded activity");
    };

    if snapshot.message_count == 0 {
        return InactivityDecision::none("session has no messages");
    }

    let idle_minutes = (now - last_activity).num_minutes();
    if idle_minutes < config.inactivity_threshold_minutes {
        return InactivityDecision::none(format!("active {idle_minutes} minutes ago"));
    }

    if let Some(client) = llm {
        let prompt = prompts::proactive_decision_prompt(
            snapshot.summary.as_deref(),
            snapshot.message_count,
            (now - last_activity).num_seconds() as f64 / 60.0,
            &snapshot.recent_turns,
        );

        match tokio::time::timeout(llm_timeout, client.complete(&CompletionRequest::prompt(prompt)))
            .await
        {
            Ok(Ok(text)) => {
                if let Some(decision) = parse_decision(&text) {
                    debug!(
                        session = %snapshot.id,
                        action = decision.action.as_str(),
                        "inactivity decision from analysis"
                    );
                    return decision;
                }
                warn!(session = %snapshot.id, "unparseable inactivity analysis, using fallback");
            }
            Ok(Err(e)) => {
                warn!(session = %snapshot.id, "inactivity analysis failed, using fallback: {e}");
            }
            Err(_) => {
                warn!(session = %snapshot.id, "inactivity analysis timed out, using fallback");
            }
        }
    }

    deterministic_decision(idle_minutes, config)
}

/// Time-bucket rule used when no LLM client is available or it failed:
/// short idle continues the thread, long idle opens a new topic.
fn deterministic_decision(idle_minutes: i64, config: &EngineConfig) -> InactivityDecision {
    if idle_minutes >= config.inactivity_new_topic_minutes {
        InactivityDecision {
            action: InactivityAction::NewTopic,
            reason: format!("idle for {idle_minutes} minutes, topic likely concluded"),
            suggested_message: Some(NEW_TOPIC_TEMPLATE.to_string()),
        }
    } else {
        InactivityDecision {
            action: InactivityAction::Continue,
            reason: format!("idle for {idle_minutes} minutes"),
            suggested_message: Some(CONTINUE_TEMPLATE.to_string()),
        }
    }
}

fn parse_decision(text: &str) -> Option<InactivityDecision> {
    let value = prompts::extract_json_object(text)?;

    let action = match value.get("action")?.as_str()? {
        "continue" => InactivityAction::Continue,
        "new_topic" => InactivityAction::NewTopic,
        "wait" => InactivityAction::None,
        _ => return None,
    };

    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let suggested_message = match action {
        InactivityAction::None => None,
        _ => value
            .get("suggested_message")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string()),
    };

    Some(InactivityDecision {
        action,
        reason,
        suggested_message,
    })
}
