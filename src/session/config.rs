use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{MicrophoneConstraints, DEFAULT_SPEAKING_TOLERANCE_SECS};

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sample rate for capture and playback (the agent speaks 16kHz PCM)
    pub sample_rate: u32,

    /// Samples per capture block
    /// Default: 4096 (256ms at 16kHz)
    pub block_size: usize,

    /// How close the output clock must be to the schedule cursor for the
    /// agent to count as finished speaking, in seconds
    pub speaking_tolerance_secs: f64,

    /// Request echo cancellation from the microphone
    pub echo_cancellation: bool,

    /// Request noise suppression from the microphone
    pub noise_suppression: bool,

    /// Upper bound on session negotiation
    pub negotiation_timeout: Duration,

    /// Upper bound on opening the realtime transport
    pub connect_timeout: Duration,

    /// How long `stop` waits for the backend to close the transport before
    /// treating it as closed
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            block_size: 4096,
            speaking_tolerance_secs: DEFAULT_SPEAKING_TOLERANCE_SECS,
            echo_cancellation: true,
            noise_suppression: true,
            negotiation_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(3),
        }
    }
}

impl SessionConfig {
    /// Microphone request derived from this configuration (always mono)
    pub fn microphone_constraints(&self) -> MicrophoneConstraints {
        MicrophoneConstraints {
            sample_rate: self.sample_rate,
            channels: 1,
            block_size: self.block_size,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
        }
    }
}
