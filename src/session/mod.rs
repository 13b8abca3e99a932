//! Conversation session management
//!
//! This module provides the `SessionController` that manages:
//! - The session lifecycle (idle, connecting, active, ending, completed, error)
//! - Session negotiation and the realtime transport
//! - Microphone capture and agent audio playback
//! - Transcript and profile collection
//! - Session statistics

mod config;
mod controller;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::{Collaborators, SessionController, SessionUpdate};
pub use state::{LifecycleState, Trigger};
pub use stats::{ProfileSnapshot, Role, SessionStats, TranscriptEntry};
