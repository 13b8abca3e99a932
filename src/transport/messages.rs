use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;
use crate::session::ProfileSnapshot;

/// A message received on the realtime transport
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Structured event sent by the backend as `{"type": <kind>, ...}`
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Ready { session_id: Option<String> },
    UserTranscript(Option<String>),
    AgentResponse(Option<String>),
    ProfileUpdated(Option<ProfileSnapshot>),
    SessionEnded(Option<ProfileSnapshot>),
    Error(Option<String>),
    /// Conversation initiation metadata from the voice agent, informational
    Metadata,
    Unrecognized(String),
}

/// Where an inbound message goes
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// PCM audio for the playback scheduler
    Audio(Vec<u8>),
    /// Control/state event for the session controller
    Event(InboundEvent),
}

/// Wire envelope; every kind-specific field is optional
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    user_transcript: Option<String>,
    agent_response: Option<String>,
    profile: Option<ProfileSnapshot>,
    message: Option<String>,
    session_id: Option<String>,
}

/// Control messages sent to the backend
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    EndConversation,
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::TransportError(e.to_string()))
    }
}

/// Classify an inbound message.
///
/// Binary payloads are always audio. Text payloads must parse as an event
/// envelope; anything else is `MalformedMessage`, which callers drop.
pub fn route(message: InboundMessage) -> Result<Routed, SessionError> {
    match message {
        InboundMessage::Binary(bytes) => Ok(Routed::Audio(bytes)),
        InboundMessage::Text(text) => parse_event(&text).map(Routed::Event),
    }
}

pub fn parse_event(text: &str) -> Result<InboundEvent, SessionError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| SessionError::MalformedMessage(e.to_string()))?;

    let event = match envelope.kind.as_str() {
        "ready" => InboundEvent::Ready {
            session_id: envelope.session_id,
        },
        "user_transcript" => InboundEvent::UserTranscript(envelope.user_transcript),
        "agent_response" => InboundEvent::AgentResponse(envelope.agent_response),
        "profile_updated" => InboundEvent::ProfileUpdated(envelope.profile),
        "session_ended" => InboundEvent::SessionEnded(envelope.profile),
        "error" => InboundEvent::Error(envelope.message),
        "conversation_initiation_metadata_event" => InboundEvent::Metadata,
        _ => InboundEvent::Unrecognized(envelope.kind),
    };

    debug!("Received message: {:?}", event);

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(text: &str) -> InboundEvent {
        match route(InboundMessage::Text(text.to_string())).unwrap() {
            Routed::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_is_always_audio() {
        // Even bytes that happen to look like JSON
        let bytes = br#"{"type":"ready"}"#.to_vec();
        assert_eq!(
            route(InboundMessage::Binary(bytes.clone())).unwrap(),
            Routed::Audio(bytes)
        );
    }

    #[test]
    fn test_known_kinds() {
        assert_eq!(
            event(r#"{"type":"ready","session_id":"abc"}"#),
            InboundEvent::Ready {
                session_id: Some("abc".into())
            }
        );
        assert_eq!(
            event(r#"{"type":"user_transcript","user_transcript":"hi"}"#),
            InboundEvent::UserTranscript(Some("hi".into()))
        );
        assert_eq!(
            event(r#"{"type":"agent_response","agent_response":"Hello!"}"#),
            InboundEvent::AgentResponse(Some("Hello!".into()))
        );
        assert_eq!(
            event(r#"{"type":"error","message":"agent unavailable"}"#),
            InboundEvent::Error(Some("agent unavailable".into()))
        );
        assert_eq!(
            event(r#"{"type":"conversation_initiation_metadata_event","conversation_initiation_metadata_event":{"id":"x"}}"#),
            InboundEvent::Metadata
        );
    }

    #[test]
    fn test_profile_payloads() {
        let updated = event(r#"{"type":"profile_updated","profile":{"age":29,"looking_for":"hiking buddy"}}"#);
        match updated {
            InboundEvent::ProfileUpdated(Some(profile)) => {
                assert_eq!(profile.age(), Some(29));
                assert_eq!(profile.looking_for(), Some("hiking buddy"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            event(r#"{"type":"profile_updated"}"#),
            InboundEvent::ProfileUpdated(None)
        );
        assert_eq!(
            event(r#"{"type":"session_ended","profile":null}"#),
            InboundEvent::SessionEnded(None)
        );
    }

    #[test]
    fn test_missing_content_is_none() {
        assert_eq!(
            event(r#"{"type":"user_transcript"}"#),
            InboundEvent::UserTranscript(None)
        );
    }

    #[test]
    fn test_unrecognized_kind_is_not_malformed() {
        assert_eq!(
            event(r#"{"type":"ping","ping_event":{"event_id":1}}"#),
            InboundEvent::Unrecognized("ping".into())
        );
    }

    #[test]
    fn test_malformed_text() {
        for text in ["not json", "{\"type\":", "{}", "[1,2]", r#"{"type":42}"#] {
            let result = route(InboundMessage::Text(text.to_string()));
            assert!(
                matches!(result, Err(SessionError::MalformedMessage(_))),
                "{:?} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_end_conversation_wire_format() {
        let text = ControlMessage::EndConversation.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "end_conversation"}));
    }
}
