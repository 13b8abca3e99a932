use super::state::AppState;
use crate::error::SessionError;
use crate::session::{LifecycleState, ProfileSnapshot, TranscriptEntry};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub state: LifecycleState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub state: LifecycleState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Unauthenticated => StatusCode::UNAUTHORIZED,
        SessionError::DeviceAccessDenied(_) => StatusCode::FORBIDDEN,
        SessionError::SessionInProgress(_) | SessionError::Cancelled => StatusCode::CONFLICT,
        SessionError::SessionNegotiationFailed(_)
        | SessionError::TransportError(_)
        | SessionError::RemoteError(_) => StatusCode::BAD_GATEWAY,
        SessionError::AudioInitFailed(_) | SessionError::MalformedMessage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: &SessionError) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/start
/// Start a new conversation
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Starting voice session");

    match state.controller.start().await {
        Ok(session_id) => {
            info!("Voice session {} connected", session_id);
            (
                StatusCode::OK,
                Json(StartSessionResponse {
                    session_id,
                    state: state.controller.state(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            if e.is_fatal() {
                error!("Failed to start session: {}", e);
            } else {
                warn!("Session not started: {}", e);
            }
            error_response(&e)
        }
    }
}

/// POST /session/stop
/// End the conversation and return final statistics
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping voice session");

    match state.controller.stop().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            error!("Failed to stop session: {}", e);
            error_response(&e)
        }
    }
}

/// POST /session/mute
/// Mute or unmute outbound audio
pub async fn set_mute(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    state.controller.set_muted(req.muted);
    (
        StatusCode::OK,
        Json(MuteResponse {
            muted: state.controller.is_muted(),
        }),
    )
}

/// POST /session/reset
/// Return a completed or failed session to idle
pub async fn reset_session(State(state): State<AppState>) -> impl IntoResponse {
    let state = state.controller.reset().await;
    (StatusCode::OK, Json(ResetResponse { state }))
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.get_stats().await))
}

/// GET /session/transcript
/// Transcript accumulated so far, oldest first
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.controller.transcript().await;
    (StatusCode::OK, Json(transcript))
}

/// GET /session/profile
pub async fn get_profile(State(state): State<AppState>) -> impl IntoResponse {
    let profile: ProfileSnapshot = state.controller.profile().await;
    (StatusCode::OK, Json(profile))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            status_for(&SessionError::Unauthenticated),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&SessionError::SessionInProgress(LifecycleState::Active)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&SessionError::DeviceAccessDenied("denied".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&SessionError::SessionNegotiationFailed("503".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
