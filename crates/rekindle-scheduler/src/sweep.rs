//! One-shot sweep passes over all active sessions. Split out from the spawn
//! loops so tests can drive them with a fixed clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rekindle_common::{ChatTurn, Result, Role};
use rekindle_config::EngineConfig;
use rekindle_db::{SessionRecord, SessionStore};
use rekindle_engine::{
    InactivityAction, PersonalityCheck, SessionSnapshot, apply_suggestion, decide_inactivity,
    decide_personality_update, record_inactivity_check, record_personality_check,
};
use rekindle_llm::CompletionClient;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    /// Sessions considered by the sweep.
    pub examined: usize,
    /// Sessions where the sweep did something: a nudge sent or an
    /// evaluation recorded.
    pub acted: usize,
    /// Sessions skipped before any evaluation ran.
    pub skipped: usize,
    /// State writes lost to a concurrent update and retried next round.
    pub conflicts: usize,
    /// Sessions that failed; logged and picked up again next round.
    pub errors: usize,
}

/// Outcome of one session's pass, before it is folded into the report.
enum Pass {
    Skipped,
    Quiet,
    Acted,
    Conflict,
}

/// Check every active session for inactivity and append a proactive
/// assistant message where the decision calls for one. A failing session
/// never stops the sweep from reaching the rest.
pub async fn run_inactivity_sweep(
    store: &SessionStore,
    llm: Option<&dyn CompletionClient>,
    config: &EngineConfig,
    llm_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for record in store.list_active_sessions()? {
        report.examined += 1;

        if !idle_long_enough(&record, config, now) {
            report.skipped += 1;
            continue;
        }

        match nudge_session(store, llm, config, llm_timeout, now, &record).await {
            Ok(Pass::Acted) => report.acted += 1,
            Ok(Pass::Conflict) => report.conflicts += 1,
            Ok(_) => {}
            Err(e) => {
                warn!(session = %record.id, "inactivity sweep failed for session: {e}");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

async fn nudge_session(
    store: &SessionStore,
    llm: Option<&dyn CompletionClient>,
    config: &EngineConfig,
    llm_timeout: Duration,
    now: DateTime<Utc>,
    record: &SessionRecord,
) -> Result<Pass> {
    let turns = store.recent_turns(&record.id, config.analysis_window)?;
    let snapshot = SessionSnapshot::from_record(record, turns);
    let decision = decide_inactivity(&snapshot, config, llm, llm_timeout, now).await;

    let mut state = record.state.clone();
    record_inactivity_check(&mut state, now);

    if !store.store_state(&record.id, &state, record.state_version)? {
        warn!(session = %record.id, "inactivity state write lost to concurrent update");
        return Ok(Pass::Conflict);
    }

    match (decision.action, decision.suggested_message) {
        (InactivityAction::None, _) | (_, None) => {
            debug!(session = %record.id, reason = %decision.reason, "no nudge");
            Ok(Pass::Quiet)
        }
        (action, Some(message)) => {
            store.append_turn(&ChatTurn::new(
                record.id.clone(),
                Role::Assistant,
                message,
                now,
            ))?;
            info!(
                session = %record.id,
                action = action.as_str(),
                "proactive message sent"
            );
            Ok(Pass::Acted)
        }
    }
}

/// Re-evaluate personality prompts for active sessions. Evaluations are
/// recorded as pending suggestions; high-confidence ones are applied to the
/// agent immediately. A failing session never stops the sweep from reaching
/// the rest.
pub async fn run_personality_sweep(
    store: &SessionStore,
    llm: Option<&dyn CompletionClient>,
    config: &EngineConfig,
    llm_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for record in store.list_active_sessions()? {
        report.examined += 1;

        match check_session_personality(store, llm, config, llm_timeout, now, &record).await {
            Ok(Pass::Skipped) => report.skipped += 1,
            Ok(Pass::Acted) => report.acted += 1,
            Ok(Pass::Conflict) => report.conflicts += 1,
            Ok(Pass::Quiet) => {}
            Err(e) => {
                warn!(session = %record.id, "personality sweep failed for session: {e}");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

async fn check_session_personality(
    store: &SessionStore,
    llm: Option<&dyn CompletionClient>,
    config: &EngineConfig,
    llm_timeout: Duration,
    now: DateTime<Utc>,
    record: &SessionRecord,
) -> Result<Pass> {
    let agent = store.get_agent(&record.agent_id)?;
    let turns = store.recent_turns(&record.id, config.analysis_window)?;
    let snapshot = SessionSnapshot::from_record(record, turns);

    let check = decide_personality_update(
        &snapshot,
        Some(&agent.personality_prompt),
        config,
        llm,
        llm_timeout,
        now,
    )
    .await;

    let suggestion = match check {
        PersonalityCheck::Skipped { reason, .. } => {
            debug!(session = %record.id, reason = reason.as_str(), "personality check skipped");
            return Ok(Pass::Skipped);
        }
        PersonalityCheck::Evaluated(suggestion) => suggestion,
    };

    let mut state = record.state.clone();
    let auto_apply = suggestion.should_update
        && suggestion.confidence >= config.personality_auto_apply_confidence;
    record_personality_check(&mut state, suggestion, now);

    // Stage the application in the state image; the agent row only changes
    // once this image wins the version check.
    let applied = if auto_apply {
        apply_suggestion(&mut state, now)
    } else {
        None
    };

    if !store.store_state(&record.id, &state, record.state_version)? {
        warn!(session = %record.id, "personality state write lost to concurrent update");
        return Ok(Pass::Conflict);
    }

    if let Some(applied) = applied {
        store.set_agent_personality(&record.agent_id, &applied.personality)?;
        info!(
            session = %record.id,
            agent = %record.agent_id,
            confidence = applied.confidence,
            "personality updated automatically"
        );
    }

    Ok(Pass::Acted)
}

fn idle_long_enough(record: &SessionRecord, config: &EngineConfig, now: DateTime<Utc>) -> bool {
    record.message_count > 0
        && record
            .last_activity_at
            .is_some_and(|t| (now - t).num_minutes() >= config.inactivity_threshold_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rekindle_common::{Error, SessionId};
    use rekindle_db::NewAgent;
    use rekindle_llm::CompletionRequest;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(1);

    struct CannedClient(Option<String>);

    #[async_trait]
    impl CompletionClient for CannedClient {
        fn provider_id(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| Error::Analysis("canned failure".to_string()))
        }
    }

    /// A client that writes session state mid-evaluation, so the sweep's own
    /// write always loses the version check.
    struct ConflictingClient {
        store: Arc<SessionStore>,
        session: SessionId,
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for ConflictingClient {
        fn provider_id(&self) -> &str {
            "conflicting"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            let record = self.store.get_session(&self.session)?;
            self.store
                .store_state(&self.session, &record.state, record.state_version)?;
            Ok(self.reply.clone())
        }
    }

    fn seed_session(store: &SessionStore, turns: usize, idle: ChronoDuration) -> SessionId {
        let agent = store
            .create_agent(NewAgent {
                name: "tutor".to_string(),
                personality_prompt: "Patient and thorough.".to_string(),
                model: None,
            })
            .unwrap();
        let session = store.create_session(&agent.id).unwrap();

        let base = Utc::now() - idle - ChronoDuration::minutes(turns as i64);
        for i in 0..turns {
            let role = if i % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            store
                .append_turn(&ChatTurn::new(
                    session.id.clone(),
                    role,
                    format!("turn {i}"),
                    base + ChronoDuration::minutes(i as i64),
                ))
                .unwrap();
        }

        session.id
    }

    fn store_with_session(turns: usize, idle: ChronoDuration) -> (SessionStore, SessionId) {
        let store = SessionStore::in_memory().unwrap();
        let session_id = seed_session(&store, turns, idle);
        (store, session_id)
    }

    #[tokio::test]
    async fn inactivity_sweep_nudges_quiet_sessions() {
        let (store, session_id) = store_with_session(4, ChronoDuration::minutes(45));
        let config = EngineConfig::default();

        let report = run_inactivity_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.acted, 1);

        let record = store.get_session(&session_id).unwrap();
        assert_eq!(record.message_count, 5);
        assert!(record.state.last_inactivity_check.is_some());

        let turns = store.recent_turns(&session_id, 10).unwrap();
        let last = turns.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(!last.content.is_empty());
    }

    #[tokio::test]
    async fn inactivity_sweep_leaves_fresh_sessions_alone() {
        let (store, session_id) = store_with_session(4, ChronoDuration::minutes(1));
        let config = EngineConfig::default();

        let report = run_inactivity_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.acted, 0);
        assert_eq!(report.skipped, 1);

        let record = store.get_session(&session_id).unwrap();
        assert_eq!(record.message_count, 4);
        assert!(record.state.last_inactivity_check.is_none());
    }

    #[tokio::test]
    async fn inactivity_sweep_skips_empty_sessions() {
        let (store, _) = store_with_session(0, ChronoDuration::hours(5));
        let config = EngineConfig::default();

        let report = run_inactivity_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        // Sessions without messages never reach the active list.
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn inactivity_sweep_continues_past_broken_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.db");
        let store = SessionStore::open(&path).unwrap();
        let broken = seed_session(&store, 4, ChronoDuration::minutes(45));
        let healthy = seed_session(&store, 4, ChronoDuration::minutes(45));
        let config = EngineConfig::default();

        // Wreck one session's history through a second connection.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE messages SET timestamp = 'garbage' WHERE session_id = ?",
            [broken.as_str()],
        )
        .unwrap();
        drop(conn);

        let report = run_inactivity_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.acted, 1);

        let record = store.get_session(&healthy).unwrap();
        assert_eq!(record.message_count, 5);
    }

    #[tokio::test]
    async fn personality_sweep_records_keyless_evaluation() {
        let (store, session_id) = store_with_session(25, ChronoDuration::minutes(2));
        let config = EngineConfig::default();

        let report = run_personality_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.acted, 1);

        let record = store.get_session(&session_id).unwrap();
        assert!(record.state.last_personality_check.is_some());
        let stored = record.state.personality_update_suggestion.unwrap();
        // 25 messages is not a fallback-interval multiple.
        assert!(!stored.should_update);
    }

    #[tokio::test]
    async fn personality_sweep_skips_short_sessions_without_state_writes() {
        let (store, session_id) = store_with_session(6, ChronoDuration::minutes(2));
        let config = EngineConfig::default();

        let report = run_personality_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.acted, 0);
        assert_eq!(report.skipped, 1);

        let record = store.get_session(&session_id).unwrap();
        assert!(record.state.last_personality_check.is_none());
        assert_eq!(record.state_version, 0);
    }

    #[tokio::test]
    async fn personality_sweep_auto_applies_confident_suggestions() {
        let (store, session_id) = store_with_session(25, ChronoDuration::minutes(2));
        let config = EngineConfig::default();
        let client = CannedClient(Some(
            r#"{"should_update": true, "reason": "user wants brevity", "suggested_personality": "Be concise.", "confidence": 0.95}"#
                .to_string(),
        ));

        let report = run_personality_sweep(&store, Some(&client), &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.acted, 1);

        let record = store.get_session(&session_id).unwrap();
        assert!(record.state.personality_update_suggestion.is_none());
        assert!(record.state.last_personality_update.is_some());

        let agent = store.get_agent(&record.agent_id).unwrap();
        assert_eq!(agent.personality_prompt, "Be concise.");
    }

    #[tokio::test]
    async fn personality_sweep_keeps_moderate_suggestions_pending() {
        let (store, session_id) = store_with_session(25, ChronoDuration::minutes(2));
        let config = EngineConfig::default();
        let client = CannedClient(Some(
            r#"{"should_update": true, "reason": "maybe", "suggested_personality": "Be playful.", "confidence": 0.6}"#
                .to_string(),
        ));

        run_personality_sweep(&store, Some(&client), &config, TIMEOUT, Utc::now())
            .await
            .unwrap();

        let record = store.get_session(&session_id).unwrap();
        assert!(record.state.pending_suggestion().is_some());

        let agent = store.get_agent(&record.agent_id).unwrap();
        assert_eq!(agent.personality_prompt, "Patient and thorough.");
    }

    #[tokio::test]
    async fn lost_state_write_never_touches_the_agent() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        let session_id = seed_session(&store, 25, ChronoDuration::minutes(2));
        let config = EngineConfig::default();
        let client = ConflictingClient {
            store: Arc::clone(&store),
            session: session_id.clone(),
            reply: r#"{"should_update": true, "reason": "user wants brevity", "suggested_personality": "Be concise.", "confidence": 0.95}"#
                .to_string(),
        };

        let report = run_personality_sweep(&store, Some(&client), &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.acted, 0);

        // The losing write leaves the stored state and the agent untouched.
        let record = store.get_session(&session_id).unwrap();
        assert!(record.state.last_personality_check.is_none());
        assert!(record.state.last_personality_update.is_none());

        let agent = store.get_agent(&record.agent_id).unwrap();
        assert_eq!(agent.personality_prompt, "Patient and thorough.");
    }

    #[tokio::test]
    async fn personality_sweep_continues_past_broken_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.db");
        let store = SessionStore::open(&path).unwrap();
        let broken = seed_session(&store, 4, ChronoDuration::minutes(2));
        let healthy = seed_session(&store, 6, ChronoDuration::minutes(2));
        let config = EngineConfig::default();

        // Orphan one session's agent through a second connection.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "foreign_keys", false).unwrap();
        conn.execute(
            "UPDATE sessions SET agent_id = 'gone' WHERE id = ?",
            [broken.as_str()],
        )
        .unwrap();
        drop(conn);

        let report = run_personality_sweep(&store, None, &config, TIMEOUT, Utc::now())
            .await
            .unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.skipped, 1);

        let record = store.get_session(&healthy).unwrap();
        assert!(record.state.last_personality_check.is_none());
    }

    #[tokio::test]
    async fn stale_state_version_is_counted_as_conflict() {
        let (store, session_id) = store_with_session(4, ChronoDuration::minutes(45));

        // Another writer bumps the state version between list and store.
        let record = store.get_session(&session_id).unwrap();
        let records = store.list_active_sessions().unwrap();
        assert_eq!(records.len(), 1);
        assert!(
            store
                .store_state(&session_id, &record.state, record.state_version)
                .unwrap()
        );

        // The sweep still sees version 0 through its own listing only if run
        // before the bump, so simulate by direct call with the stale record.
        let report = {
            let mut report = SweepReport::default();
            let stale = &records[0];
            let mut state = stale.state.clone();
            record_inactivity_check(&mut state, Utc::now());
            if !store
                .store_state(&stale.id, &state, stale.state_version)
                .unwrap()
            {
                report.conflicts += 1;
            }
            report
        };
        assert_eq!(report.conflicts, 1);
    }
}
