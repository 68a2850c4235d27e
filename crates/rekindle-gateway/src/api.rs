use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rekindle_common::{AgentId, ChatTurn, Error, Role, SessionId};
use rekindle_db::{AgentRecord, NewAgent, SessionRecord};
use rekindle_engine::{
    AgentSelector, PersonalityCheck, PrimaryOnly, RandomSelector, SelectionContext,
    SessionSnapshot, apply_suggestion, decide_inactivity, decide_personality_update,
    dismiss_suggestion, record_personality_check, summary_due,
};
use rekindle_llm::{ChatRole, CompletionRequest, PromptMessage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub personality_prompt: String,
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub struct SetPersonalityRequest {
    pub personality_prompt: String,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
}

#[derive(Deserialize)]
pub struct AddAgentRequest {
    pub agent_id: String,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct AgentReply {
    pub agent_id: String,
    pub agent_name: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

fn agent_json(agent: &AgentRecord) -> serde_json::Value {
    serde_json::json!({
        "id": agent.id,
        "name": agent.name,
        "personality_prompt": agent.personality_prompt,
        "model": agent.model,
        "created_at": agent.created_at,
        "updated_at": agent.updated_at,
    })
}

fn session_json(session: &SessionRecord) -> serde_json::Value {
    serde_json::json!({
        "id": session.id,
        "agent_id": session.agent_id,
        "started_at": session.started_at,
        "last_activity_at": session.last_activity_at,
        "message_count": session.message_count,
        "summary": session.summary,
        "pending_suggestion": session.state.pending_suggestion(),
    })
}

fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("request failed: {e}");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// POST /api/agents — register a new agent.
pub async fn create_agent(
    State(state): State<SharedState>,
    Json(body): Json<CreateAgentRequest>,
) -> Response {
    if body.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "agent name must not be empty" })),
        )
            .into_response();
    }

    match state.store.create_agent(NewAgent {
        name: body.name,
        personality_prompt: body.personality_prompt,
        model: body.model,
    }) {
        Ok(agent) => (StatusCode::CREATED, Json(agent_json(&agent))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/agents — list registered agents.
pub async fn list_agents(State(state): State<SharedState>) -> Response {
    match state.store.list_agents() {
        Ok(agents) => Json(serde_json::json!({
            "agents": agents.iter().map(agent_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/agents/{id} — fetch one agent.
pub async fn get_agent(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
) -> Response {
    match state.store.get_agent(&AgentId::from_str(agent_id)) {
        Ok(agent) => Json(agent_json(&agent)).into_response(),
        Err(e) => error_response(e),
    }
}

/// PUT /api/agents/{id}/personality — replace an agent's personality prompt.
pub async fn set_agent_personality(
    State(state): State<SharedState>,
    Path(agent_id): Path<String>,
    Json(body): Json<SetPersonalityRequest>,
) -> Response {
    let id = AgentId::from_str(agent_id);
    match state
        .store
        .set_agent_personality(&id, &body.personality_prompt)
        .and_then(|_| state.store.get_agent(&id))
    {
        Ok(agent) => Json(agent_json(&agent)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/sessions — start a session with a primary agent.
pub async fn create_session(
    State(state): State<SharedState>,
    Json(body): Json<CreateSessionRequest>,
) -> Response {
    let agent_id = AgentId::from_str(body.agent_id);
    let result = state.store.get_agent(&agent_id).and_then(|_| {
        let session = state.store.create_session(&agent_id)?;
        // The primary agent is always part of the responder pool.
        state.store.add_session_agent(&session.id, &agent_id)?;
        Ok(session)
    });

    match result {
        Ok(session) => (StatusCode::CREATED, Json(session_json(&session))).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/sessions — list all sessions, newest first.
pub async fn list_sessions(State(state): State<SharedState>) -> Response {
    match state.store.list_sessions() {
        Ok(sessions) => Json(serde_json::json!({
            "sessions": sessions.iter().map(session_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/sessions/{id}/agents — add an agent to the responder pool.
pub async fn add_session_agent(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<AddAgentRequest>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let agent_id = AgentId::from_str(body.agent_id);

    let result = state
        .store
        .get_session(&session_id)
        .and_then(|_| state.store.get_agent(&agent_id))
        .and_then(|_| state.store.add_session_agent(&session_id, &agent_id))
        .and_then(|_| state.store.session_agents(&session_id));

    match result {
        Ok(agents) => Json(serde_json::json!({
            "session_id": session_id,
            "agents": agents.iter().map(agent_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/sessions/{id}/messages — send a message and collect replies.
pub async fn send_message(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    if let Err(e) = state.store.get_session(&session_id) {
        return error_response(e);
    }

    let now = Utc::now();
    if let Err(e) =
        state
            .store
            .append_turn(&ChatTurn::new(session_id.clone(), Role::User, body.content, now))
    {
        return error_response(e);
    }

    let pool = match responder_pool(&state, &session_id) {
        Ok(pool) => pool,
        Err(e) => return error_response(e),
    };

    let ctx = SelectionContext::default();
    let selected: Vec<&AgentRecord> = if pool.len() > 1 {
        RandomSelector::new(state.config.engine.respond_probability).select(&pool, &ctx)
    } else {
        PrimaryOnly.select(&pool, &ctx)
    };

    let window = state.config.engine.analysis_window;
    let mut replies = Vec::with_capacity(selected.len());
    for agent in selected {
        let history = match state.store.recent_turns(&session_id, window) {
            Ok(history) => history,
            Err(e) => return error_response(e),
        };

        let content = agent_reply(&state, agent, &history).await;
        let turn = ChatTurn::assistant(session_id.clone(), content.clone());
        if let Err(e) = state.store.append_turn(&turn) {
            return error_response(e);
        }

        replies.push(AgentReply {
            agent_id: agent.id.to_string(),
            agent_name: agent.name.clone(),
            content,
        });
    }

    let record = match state.store.get_session(&session_id) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    refresh_summary(&state, &record).await;
    inline_personality_check(&state, &record).await;

    Json(serde_json::json!({
        "session_id": session_id,
        "replies": replies,
        "message_count": record.message_count,
    }))
    .into_response()
}

/// GET /api/sessions/{id}/history — conversation turns, oldest first.
pub async fn session_history(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let result = state
        .store
        .get_session(&session_id)
        .and_then(|_| state.store.recent_turns(&session_id, params.limit));

    match result {
        Ok(turns) => Json(serde_json::json!({
            "session_id": session_id,
            "messages": turns
                .iter()
                .map(|t| serde_json::json!({
                    "id": t.id,
                    "role": t.role.as_str(),
                    "content": t.content,
                    "timestamp": t.timestamp,
                }))
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/sessions/{id}/personality-suggestion — evaluate (or fetch the
/// cached) personality suggestion for this session.
pub async fn personality_suggestion(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let record = match state.store.get_session(&session_id) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    let snapshot = match snapshot_for(&state, &record) {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(e),
    };
    let agent = match state.store.get_agent(&record.agent_id) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };

    let check = decide_personality_update(
        &snapshot,
        Some(&agent.personality_prompt),
        &state.config.engine,
        state.llm.as_deref(),
        state.llm_timeout(),
        Utc::now(),
    )
    .await;

    match check {
        PersonalityCheck::Skipped { reason, cached } => {
            let has_suggestion = cached.as_ref().is_some_and(|s| s.should_update);
            Json(serde_json::json!({
                "status": "skipped",
                "reason": reason.as_str(),
                "has_suggestion": has_suggestion,
                "suggestion": cached,
            }))
            .into_response()
        }
        PersonalityCheck::Evaluated(suggestion) => {
            let mut new_state = record.state.clone();
            record_personality_check(&mut new_state, suggestion.clone(), Utc::now());

            match state
                .store
                .store_state(&session_id, &new_state, record.state_version)
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(session = %session_id, "suggestion state write lost to concurrent update");
                }
                Err(e) => return error_response(e),
            }

            Json(serde_json::json!({
                "status": "evaluated",
                "has_suggestion": suggestion.should_update,
                "suggestion": suggestion,
            }))
            .into_response()
        }
    }
}

/// POST /api/sessions/{id}/personality-update — apply the pending suggestion
/// to the session's primary agent.
pub async fn personality_update(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let record = match state.store.get_session(&session_id) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    let mut new_state = record.state.clone();
    let Some(applied) = apply_suggestion(&mut new_state, Utc::now()) else {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "no pending personality suggestion" })),
        )
            .into_response();
    };

    // Persist the cleared slot first; the agent row only changes once this
    // write wins the version check.
    match state
        .store
        .store_state(&session_id, &new_state, record.state_version)
    {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "session state changed, retry" })),
            )
                .into_response();
        }
        Err(e) => return error_response(e),
    }

    if let Err(e) = state
        .store
        .set_agent_personality(&record.agent_id, &applied.personality)
    {
        return error_response(e);
    }

    info!(session = %session_id, agent = %record.agent_id, "personality suggestion applied");
    Json(serde_json::json!({
        "success": true,
        "session_id": session_id,
        "agent_id": record.agent_id,
        "applied": applied,
    }))
    .into_response()
}

/// POST /api/sessions/{id}/personality-dismiss — discard the pending
/// suggestion without applying it.
pub async fn personality_dismiss(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let record = match state.store.get_session(&session_id) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    let mut new_state = record.state.clone();
    if !dismiss_suggestion(&mut new_state) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "no pending personality suggestion" })),
        )
            .into_response();
    }

    match state
        .store
        .store_state(&session_id, &new_state, record.state_version)
    {
        Ok(true) => Json(serde_json::json!({
            "success": true,
            "session_id": session_id,
            "dismissed": true,
        }))
        .into_response(),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "session state changed, retry" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/sessions/{id}/inactivity — evaluate the proactive-message
/// decision without sending anything. The background sweep does the sending.
pub async fn inactivity_check(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = SessionId::from_str(session_id);
    let record = match state.store.get_session(&session_id) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    let snapshot = match snapshot_for(&state, &record) {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(e),
    };

    let decision = decide_inactivity(
        &snapshot,
        &state.config.engine,
        state.llm.as_deref(),
        state.llm_timeout(),
        Utc::now(),
    )
    .await;

    Json(serde_json::json!({
        "session_id": session_id,
        "action": decision.action.as_str(),
        "reason": decision.reason,
        "suggested_message": decision.suggested_message,
    }))
    .into_response()
}

fn snapshot_for(
    state: &SharedState,
    record: &SessionRecord,
) -> rekindle_common::Result<SessionSnapshot> {
    let turns = state
        .store
        .recent_turns(&record.id, state.config.engine.analysis_window)?;
    Ok(SessionSnapshot::from_record(record, turns))
}

fn responder_pool(
    state: &SharedState,
    session_id: &SessionId,
) -> rekindle_common::Result<Vec<AgentRecord>> {
    let pool = state.store.session_agents(session_id)?;
    if !pool.is_empty() {
        return Ok(pool);
    }
    // Sessions created before pooling only carry the primary agent.
    let record = state.store.get_session(session_id)?;
    Ok(vec![state.store.get_agent(&record.agent_id)?])
}

/// Produce one agent's reply. Without a completion backend the gateway
/// degrades to a canned echo so the rest of the pipeline stays exercised.
async fn agent_reply(state: &SharedState, agent: &AgentRecord, history: &[ChatTurn]) -> String {
    let last_user = history
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .map(|t| t.content.clone())
        .unwrap_or_default();

    let Some(llm) = state.llm.as_deref() else {
        return format!("Simulated response to: {last_user}");
    };

    let request = CompletionRequest {
        model: agent.model.clone(),
        system: Some(agent.personality_prompt.clone()),
        messages: history
            .iter()
            .map(|t| PromptMessage {
                role: ChatRole::from(t.role),
                content: t.content.clone(),
            })
            .collect(),
        max_tokens: None,
        temperature: None,
    };

    match tokio::time::timeout(state.llm_timeout(), llm.complete(&request)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(agent = %agent.id, "completion failed, echoing: {e}");
            format!("Simulated response to: {last_user}")
        }
        Err(_) => {
            warn!(agent = %agent.id, "completion timed out, echoing");
            format!("Simulated response to: {last_user}")
        }
    }
}

/// Refresh the rolling summary on every Nth message. Failures keep the old
/// summary.
async fn refresh_summary(state: &SharedState, record: &SessionRecord) {
    if !summary_due(record.message_count, &state.config.engine) {
        return;
    }
    let Some(llm) = state.llm.as_deref() else {
        return;
    };

    let turns = match state
        .store
        .recent_turns(&record.id, state.config.engine.analysis_window)
    {
        Ok(turns) => turns,
        Err(e) => {
            warn!(session = %record.id, "summary refresh skipped: {e}");
            return;
        }
    };

    match rekindle_engine::generate_summary(
        &turns,
        record.summary.as_deref(),
        llm,
        state.llm_timeout(),
    )
    .await
    {
        Ok(summary) => {
            if let Err(e) = state.store.set_summary(&record.id, &summary) {
                warn!(session = %record.id, "failed to store summary: {e}");
            }
        }
        Err(e) => warn!(session = %record.id, "summary generation failed: {e}"),
    }
}

/// Run the personality check inline with message traffic. The engine's own
/// gates keep this from calling the model more than once per recheck window.
async fn inline_personality_check(state: &SharedState, record: &SessionRecord) {
    let agent = match state.store.get_agent(&record.agent_id) {
        Ok(agent) => agent,
        Err(e) => {
            warn!(session = %record.id, "inline personality check skipped: {e}");
            return;
        }
    };
    let snapshot = match snapshot_for(state, record) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(session = %record.id, "inline personality check skipped: {e}");
            return;
        }
    };

    let now = Utc::now();
    let check = decide_personality_update(
        &snapshot,
        Some(&agent.personality_prompt),
        &state.config.engine,
        state.llm.as_deref(),
        state.llm_timeout(),
        now,
    )
    .await;

    let PersonalityCheck::Evaluated(suggestion) = check else {
        return;
    };

    let mut new_state = record.state.clone();
    let auto_apply = suggestion.should_update
        && suggestion.confidence >= state.config.engine.personality_auto_apply_confidence;
    record_personality_check(&mut new_state, suggestion, now);

    // Stage the application in the state image; the agent row only changes
    // once this image wins the version check.
    let applied = if auto_apply {
        apply_suggestion(&mut new_state, now)
    } else {
        None
    };

    match state
        .store
        .store_state(&record.id, &new_state, record.state_version)
    {
        Ok(true) => {}
        Ok(false) => {
            warn!(session = %record.id, "inline check state write lost to concurrent update");
            return;
        }
        Err(e) => {
            warn!(session = %record.id, "failed to store inline check: {e}");
            return;
        }
    }

    if let Some(applied) = applied {
        if let Err(e) = state
            .store
            .set_agent_personality(&record.agent_id, &applied.personality)
        {
            warn!(session = %record.id, "inline auto-apply failed: {e}");
            return;
        }
        info!(session = %record.id, confidence = applied.confidence, "personality updated inline");
    }
}
