use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::protocol::server::SessionStatus;
use crate::session::SessionId;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub sessions: usize,
    pub connections: u64,
    pub uptime_secs: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if state.shutdown.is_triggered() { "draining" } else { "operational" },
        sessions: state.registry.len(),
        connections: state.connections.active_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn get_sessions(State(state): State<AppState>) -> Json<Vec<SessionStatus>> {
    let mut sessions = state.registry.snapshot();
    sessions.sort_by_key(|status| status.created_at_ms);
    Json(sessions)
}

/// Ask the task owning the session to tear it down.
pub async fn evict_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let Ok(id) = id.parse::<SessionId>() else {
        return StatusCode::BAD_REQUEST;
    };
    match state.registry.get(&id) {
        Some(session) => {
            tracing::info!(session_id = %id, "Eviction requested via admin API");
            session.request_eviction();
            StatusCode::ACCEPTED
        }
        None => StatusCode::NOT_FOUND,
    }
}
