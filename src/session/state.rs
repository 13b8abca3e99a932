use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Connecting,
    Active,
    Ending,
    Completed,
    Error,
}

/// What happened to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// User asked to start
    Start,
    /// Backend sent its first `ready` event
    Ready,
    /// Local failure: auth, device, negotiation, or transport
    Failure,
    /// User asked to stop
    UserStop,
    /// Transport closed (by either side)
    TransportClosed,
    /// Backend reported the session ended
    RemoteEnded,
    /// Backend sent an `error` event
    RemoteError,
    /// User asked to retry
    Reset,
}

impl LifecycleState {
    /// Next state for `trigger`, or `None` if the trigger does not apply here
    pub fn transition(self, trigger: Trigger) -> Option<LifecycleState> {
        use LifecycleState::*;

        match (self, trigger) {
            (Idle, Trigger::Start) => Some(Connecting),
            (Connecting, Trigger::Ready) => Some(Active),

            (Connecting | Active | Ending, Trigger::Failure) => Some(Error),
            (Connecting | Active | Ending, Trigger::RemoteError) => Some(Error),

            (Connecting | Active, Trigger::UserStop) => Some(Ending),

            // A transport closing mid-conversation is a graceful end
            (Active | Ending, Trigger::TransportClosed) => Some(Completed),
            (Connecting | Active | Ending, Trigger::RemoteEnded) => Some(Completed),

            (Completed | Error, Trigger::Reset) => Some(Idle),

            _ => None,
        }
    }

    /// Whether the session still wants microphone audio sent
    pub fn accepts_capture(self) -> bool {
        matches!(self, LifecycleState::Connecting | LifecycleState::Active)
    }

    /// Whether inbound agent audio should still be scheduled
    pub fn accepts_playback(self) -> bool {
        matches!(self, LifecycleState::Connecting | LifecycleState::Active)
    }

    /// Whether the session has finished, successfully or not
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Active => "active",
            LifecycleState::Ending => "ending",
            LifecycleState::Completed => "completed",
            LifecycleState::Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
