//! HTTP API server for external control
//!
//! This module provides a REST API for driving the voice session:
//! - POST /session/start - Start a conversation
//! - POST /session/stop - End the conversation
//! - POST /session/mute - Mute or unmute the microphone
//! - POST /session/reset - Return a finished session to idle
//! - GET /session/status - Query session statistics
//! - GET /session/transcript - Get accumulated transcript
//! - GET /session/profile - Get the latest profile snapshot
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
