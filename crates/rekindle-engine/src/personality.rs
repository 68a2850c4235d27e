use std::time::Duration;

use chrono::{DateTime, Utc};
use rekindle_common::PersonalitySuggestion;
use rekindle_config::EngineConfig;
use rekindle_llm::{CompletionClient, CompletionRequest, prompts};
use tracing::{debug, warn};

use crate::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooFewMessages,
    NotRecentlyActive,
    CheckedRecently,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooFewMessages => "too_few_messages",
            Self::NotRecentlyActive => "not_recently_active",
            Self::CheckedRecently => "checked_recently",
        }
    }
}

/// Outcome of a personality check. Only `Evaluated` results should be
/// recorded into session state; skips leave timestamps and the stored
/// suggestion untouched so re-queries stay idempotent.
#[derive(Debug, Clone)]
pub enum PersonalityCheck {
    Skipped {
        reason: SkipReason,
        /// The previously stored decision, returned for `CheckedRecently`.
        cached: Option<PersonalitySuggestion>,
    },
    Evaluated(PersonalitySuggestion),
}

impl PersonalityCheck {
    fn skipped(reason: SkipReason) -> Self {
        Self::Skipped {
            reason,
            cached: None,
        }
    }
}

const FALLBACK_SUGGESTION: &str = "Consider refreshing the personality prompt to better match \
how this conversation has evolved.";
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Decide whether the agent's personality prompt should change for this
/// session. Eligibility misses and recent checks skip without touching the
/// LLM; an actual evaluation always produces a suggestion record (possibly
/// negative), even when the analysis call fails.
pub async fn decide_personality_update(
    snapshot: &SessionSnapshot,
    current_personality: Option<&str>,
    config: &EngineConfig,
    llm: Option<&dyn CompletionClient>,
    llm_timeout: Duration,
    now: DateTime<Utc>,
) -> PersonalityCheck {
    if snapshot.message_count < config.personality_min_messages {
        return PersonalityCheck::skipped(SkipReason::TooFewMessages);
    }

    let recently_active = snapshot
        .last_activity_at
        .is_some_and(|t| (now - t).num_hours() < config.personality_activity_window_hours);
    if !recently_active {
        return PersonalityCheck::skipped(SkipReason::NotRecentlyActive);
    }

    if let Some(last_check) = snapshot.state.last_personality_check
        && (now - last_check).num_hours() < config.personality_recheck_hours
    {
        return PersonalityCheck::Skipped {
            reason: SkipReason::CheckedRecently,
            cached: snapshot.state.personality_update_suggestion.clone(),
        };
    }

    let Some(client) = llm else {
        return PersonalityCheck::Evaluated(fallback_suggestion(snapshot.message_count, config));
    };

    let window = snapshot
        .recent_turns
        .len()
        .saturating_sub(config.analysis_window);
    let prompt = prompts::personality_analysis_prompt(
        current_personality,
        snapshot.message_count,
        snapshot.summary.as_deref(),
        &snapshot.recent_turns[window..],
    );

    match tokio::time::timeout(llm_timeout, client.complete(&CompletionRequest::prompt(prompt)))
        .await
    {
        Ok(Ok(text)) => {
            let suggestion = parse_suggestion(&text);
            debug!(
                session = %snapshot.id,
                should_update = suggestion.should_update,
                confidence = suggestion.confidence,
                "personality analysis complete"
            );
            PersonalityCheck::Evaluated(suggestion)
        }
        Ok(Err(e)) => {
            warn!(session = %snapshot.id, "personality analysis failed: {e}");
            PersonalityCheck::Evaluated(PersonalitySuggestion::no_op("analysis failed"))
        }
        Err(_) => {
            warn!(session = %snapshot.id, "personality analysis timed out");
            PersonalityCheck::Evaluated(PersonalitySuggestion::no_op("analysis timed out"))
        }
    }
}

/// Deterministic keyless policy: suggest an update exactly every Nth message.
fn fallback_suggestion(message_count: u64, config: &EngineConfig) -> PersonalitySuggestion {
    let interval = config.personality_fallback_interval.max(1);
    let due = message_count > 0 && message_count % interval == 0;

    PersonalitySuggestion {
        should_update: due,
        reason: if due {
            format!("conversation reached {message_count} messages")
        } else {
            format!("next review at the {interval}-message mark")
        },
        suggested_personality: due.then(|| FALLBACK_SUGGESTION.to_string()),
        confidence: FALLBACK_CONFIDENCE,
    }
}

/// Parse the structured judgment out of the completion text. Anything that
/// does not look like the requested JSON becomes a negative decision.
fn parse_suggestion(text: &str) -> PersonalitySuggestion {
    let Some(value) = prompts::extract_json_object(text) else {
        return PersonalitySuggestion::no_op("unparseable analysis output");
    };

    let suggested_personality = value
        .get("suggested_personality")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty() && *s != "null")
        .map(|s| s.to_string());

    // A positive verdict without replacement text is unusable downstream.
    let should_update = value
        .get("should_update")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        && suggested_personality.is_some();

    PersonalitySuggestion {
        should_update,
        reason: value
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        suggested_personality,
        confidence: value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
    }
    .clamp_confidence()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockClient;
    use chrono::Duration as ChronoDuration;
    use rekindle_common::{ChatTurn, Role, SessionId, SessionState};
    use rekindle_llm::CompletionClient;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn snapshot(message_count: u64, idle: ChronoDuration) -> SessionSnapshot {
        let id = SessionId::new();
        let now = Utc::now();
        let recent_turns = (0..message_count.min(30))
            .map(|i| {
                let role = if i % 2 == 0 {
                    Role::User
                } else {
                    Role::Assistant
                };
                ChatTurn::new(
                    id.clone(),
                    role,
                    format!("turn {i}"),
                    now - idle - ChronoDuration::minutes((message_count - i) as i64),
                )
            })
            .collect();

        SessionSnapshot {
            id,
            message_count,
            last_activity_at: Some(now - idle),
            summary: None,
            recent_turns,
            state: SessionState::default(),
        }
    }

    async fn decide(
        snap: &SessionSnapshot,
        llm: Option<&dyn CompletionClient>,
    ) -> PersonalityCheck {
        decide_personality_update(
            snap,
            Some("Warm and curious."),
            &EngineConfig::default(),
            llm,
            TIMEOUT,
            Utc::now(),
        )
        .await
    }

    #[tokio::test]
    async fn under_twenty_messages_skips_without_llm_call() {
        let snap = snapshot(19, ChronoDuration::minutes(5));
        let client = MockClient::replying(r#"{"should_update": true}"#);
        let check = decide(&snap, Some(&client)).await;

        assert!(matches!(
            check,
            PersonalityCheck::Skipped {
                reason: SkipReason::TooFewMessages,
                ..
            }
        ));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn stale_session_skips() {
        let snap = snapshot(30, ChronoDuration::hours(25));
        let client = MockClient::replying(r#"{"should_update": true}"#);
        let check = decide(&snap, Some(&client)).await;

        assert!(matches!(
            check,
            PersonalityCheck::Skipped {
                reason: SkipReason::NotRecentlyActive,
                ..
            }
        ));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn recent_check_returns_cached_decision_without_llm_call() {
        let mut snap = snapshot(30, ChronoDuration::minutes(5));
        snap.state.last_personality_check = Some(Utc::now() - ChronoDuration::hours(2));
        snap.state.personality_update_suggestion = Some(PersonalitySuggestion {
            should_update: true,
            reason: "cached".to_string(),
            suggested_personality: Some("Be brief.".to_string()),
            confidence: 0.9,
        });

        let client = MockClient::replying(r#"{"should_update": false}"#);
        let check = decide(&snap, Some(&client)).await;

        match check {
            PersonalityCheck::Skipped {
                reason: SkipReason::CheckedRecently,
                cached: Some(cached),
            } => assert_eq!(cached.reason, "cached"),
            other => panic!("expected cached skip, got {other:?}"),
        }
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn check_older_than_a_day_is_reevaluated() {
        let mut snap = snapshot(30, ChronoDuration::minutes(5));
        snap.state.last_personality_check = Some(Utc::now() - ChronoDuration::hours(25));

        let client = MockClient::replying(
            r#"{"should_update": false, "reason": "style fits", "suggested_personality": null, "confidence": 0.7}"#,
        );
        let check = decide(&snap, Some(&client)).await;

        assert!(matches!(check, PersonalityCheck::Evaluated(_)));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn keyless_fallback_follows_modulo_rule() {
        for (count, expected) in [(20, false), (49, false), (50, true), (99, false), (100, true)] {
            let snap = snapshot(count, ChronoDuration::minutes(5));
            let check = decide(&snap, None).await;

            let PersonalityCheck::Evaluated(suggestion) = check else {
                panic!("expected evaluation for {count} messages");
            };
            assert_eq!(
                suggestion.should_update, expected,
                "wrong verdict at {count} messages"
            );
            assert_eq!(suggestion.confidence, 0.5);
            if expected {
                assert!(suggestion.suggested_personality.is_some());
            }
        }
    }

    #[tokio::test]
    async fn llm_judgment_is_parsed_and_clamped() {
        let snap = snapshot(30, ChronoDuration::minutes(5));
        let client = MockClient::replying(
            r#"{"should_update": true, "reason": "user prefers brevity", "suggested_personality": "Be concise and direct.", "confidence": 1.7}"#,
        );
        let check = decide(&snap, Some(&client)).await;

        let PersonalityCheck::Evaluated(suggestion) = check else {
            panic!("expected evaluation");
        };
        assert!(suggestion.should_update);
        assert_eq!(
            suggestion.suggested_personality.as_deref(),
            Some("Be concise and direct.")
        );
        assert_eq!(suggestion.confidence, 1.0);
    }

    #[tokio::test]
    async fn positive_verdict_without_text_is_downgraded() {
        let snap = snapshot(30, ChronoDuration::minutes(5));
        let client = MockClient::replying(
            r#"{"should_update": true, "reason": "vibes", "suggested_personality": null, "confidence": 0.9}"#,
        );
        let check = decide(&snap, Some(&client)).await;

        let PersonalityCheck::Evaluated(suggestion) = check else {
            panic!("expected evaluation");
        };
        assert!(!suggestion.should_update);
    }

    #[tokio::test]
    async fn unparseable_output_yields_negative_zero_confidence() {
        let snap = snapshot(30, ChronoDuration::minutes(5));
        let client = MockClient::replying("The user seems fine with the current style.");
        let check = decide(&snap, Some(&client)).await;

        let PersonalityCheck::Evaluated(suggestion) = check else {
            panic!("expected evaluation");
        };
        assert!(!suggestion.should_update);
        assert_eq!(suggestion.confidence, 0.0);
    }

    #[tokio::test]
    async fn llm_failure_yields_negative_decision() {
        let snap = snapshot(30, ChronoDuration::minutes(5));
        let client = MockClient::failing();
        let check = decide(&snap, Some(&client)).await;

        let PersonalityCheck::Evaluated(suggestion) = check else {
            panic!("expected evaluation");
        };
        assert!(!suggestion.should_update);
        assert_eq!(client.call_count(), 1);
    }
}
