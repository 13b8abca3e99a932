//! Error taxonomy for voice sessions

use crate::session::LifecycleState;
use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session controller and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Microphone access denied: {0}")]
    DeviceAccessDenied(String),

    #[error("Audio output initialisation failed: {0}")]
    AudioInitFailed(String),

    #[error("Failed to start conversation: {0}")]
    SessionNegotiationFailed(String),

    #[error("Connection error: {0}")]
    TransportError(String),

    #[error("{0}")]
    RemoteError(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("A session is already {0}")]
    SessionInProgress(LifecycleState),

    #[error("Session start cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether this error moves the session into the `error` lifecycle state.
    ///
    /// Malformed messages are dropped locally, and the two controller outcomes
    /// (`SessionInProgress`, `Cancelled`) never touch the current session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::MalformedMessage(_)
                | SessionError::SessionInProgress(_)
                | SessionError::Cancelled
        )
    }
}
