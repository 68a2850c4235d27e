use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/agents", post(api::create_agent).get(api::list_agents))
        .route("/api/agents/{id}", get(api::get_agent))
        .route(
            "/api/agents/{id}/personality",
            put(api::set_agent_personality),
        )
        .route(
            "/api/sessions",
            post(api::create_session).get(api::list_sessions),
        )
        .route("/api/sessions/{id}/agents", post(api::add_session_agent))
        .route("/api/sessions/{id}/messages", post(api::send_message))
        .route("/api/sessions/{id}/history", get(api::session_history))
        .route(
            "/api/sessions/{id}/personality-suggestion",
            get(api::personality_suggestion),
        )
        .route(
            "/api/sessions/{id}/personality-update",
            post(api::personality_update),
        )
        .route(
            "/api/sessions/{id}/personality-dismiss",
            post(api::personality_dismiss),
        )
        .route("/api/sessions/{id}/inactivity", get(api::inactivity_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(
    axum::extract::State(state): axum::extract::State<SharedState>,
) -> axum::Json<serde_json::Value> {
    let sessions = state.store.list_sessions().map(|s| s.len()).unwrap_or(0);
    axum::Json(serde_json::json!({
        "status": "running",
        "sessions": sessions,
        "llm": state.llm.as_deref().map(|c| c.provider_id()),
    }))
}
