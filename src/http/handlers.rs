use super::state::AppState;
use crate::error::VoiceError;
use crate::session::{SessionConfig, SessionState, SessionStats};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Override the configured synthetic voice
    pub voice: Option<String>,

    /// Override the configured system prompt
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

fn status_for(err: &VoiceError) -> StatusCode {
    match err {
        VoiceError::SessionActive(_) => StatusCode::CONFLICT,
        VoiceError::DeviceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/session/start
/// Open a new voice session
pub async fn start_session(
    State(state): State<AppState>,
    body: Option<Json<StartSessionRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let mut config = SessionConfig {
        session_id: format!("voice-{}", uuid::Uuid::new_v4()),
        ..state.defaults.clone()
    };
    if let Some(voice) = req.voice {
        config.voice = voice;
    }
    if let Some(prompt) = req.system_prompt {
        config.system_prompt = prompt;
    }

    info!("Starting voice session: {}", config.session_id);

    let mut current = state.session.write().await;
    let session = match state.client.open_session(config) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Failed to start session: {}", e);
            return error_response(status_for(&e), format!("Failed to start session: {}", e));
        }
    };

    let response = StartSessionResponse {
        session_id: session.id().to_string(),
        state: session.state(),
        message: format!("Voice session {} is connecting", session.id()),
    };
    *current = Some(session);

    (StatusCode::OK, Json(response)).into_response()
}

/// POST /voice/session/stop
/// Close the current session and return its final statistics
pub async fn stop_session(State(state): State<AppState>) -> Response {
    // The ended session stays in the slot for status queries
    let session = state.session.read().await.clone();

    let Some(session) = session.filter(|s| !s.state().is_terminal()) else {
        return error_response(StatusCode::NOT_FOUND, "No live voice session".to_string());
    };

    info!("Stopping voice session: {}", session.id());
    state.client.close_session(&session);

    let limit = state.defaults.close_grace + Duration::from_secs(1);
    if tokio::time::timeout(limit, session.wait_terminal()).await.is_err() {
        warn!(
            "Session {} still {} after {:?}",
            session.id(),
            session.state(),
            limit
        );
    }

    let stats: SessionStats = session.stats();
    (StatusCode::OK, Json(stats)).into_response()
}

/// GET /voice/session/status
/// Statistics for the current or most recent session
pub async fn session_status(State(state): State<AppState>) -> Response {
    match state.session.read().await.as_ref() {
        Some(session) => (StatusCode::OK, Json(session.stats())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No voice session".to_string()),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
