use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::LifecycleState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Backend-issued session identifier, once negotiated
    pub session_id: Option<String>,

    /// Current lifecycle state
    pub state: LifecycleState,

    /// When the session was started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start
    pub duration_secs: f64,

    /// Audio frames sent to the backend
    pub frames_sent: u64,

    /// Capture blocks dropped while muted, disconnected or inactive
    pub blocks_discarded: u64,

    /// Audio frames received from the backend
    pub frames_received: u64,

    /// Received frames scheduled for playback
    pub frames_scheduled: u64,

    /// Number of transcript entries
    pub transcript_entries: usize,

    /// Whether agent audio is currently queued or playing
    pub agent_speaking: bool,

    /// Whether outbound audio is muted
    pub muted: bool,

    /// Human-readable message for the last fatal error
    pub last_error: Option<String>,
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// A single spoken exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,

    /// Transcribed text
    pub content: String,

    /// When this entry was received
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Latest profile fields reported by the agent.
///
/// Replaced wholesale on every update, never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSnapshot(Map<String, Value>);

impl ProfileSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn age(&self) -> Option<u64> {
        self.get("age").and_then(Value::as_u64)
    }

    pub fn name(&self) -> Option<&str> {
        self.text("name")
    }

    pub fn about_me(&self) -> Option<&str> {
        self.text("about_me")
    }

    pub fn looking_for(&self) -> Option<&str> {
        self.text("looking_for")
    }

    pub fn interests(&self) -> Vec<&str> {
        self.list("interests")
    }

    pub fn fun_facts(&self) -> Vec<&str> {
        self.list("fun_facts")
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    fn list(&self, field: &str) -> Vec<&str> {
        self.get(field)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
