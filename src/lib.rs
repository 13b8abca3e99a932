pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AudioDevices, AudioFile, CaptureBackend, MicrophoneConstraints, PlaybackEnded, PlaybackOutput,
    WavCapture, WavFileDevices, WavPlaybackOutput,
};
pub use auth::{Identity, IdentityProvider, StaticIdentity};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use session::{
    Collaborators, LifecycleState, ProfileSnapshot, Role, SessionConfig, SessionController,
    SessionStats, SessionUpdate, TranscriptEntry,
};
pub use transport::{
    HttpNegotiator, NegotiatedSession, SessionNegotiator, Transport, TransportConnector,
    TransportEvent, TransportHandle, WebSocketConnector,
};
