pub mod backend;
pub mod capture;
pub mod file;
pub mod pcm;
pub mod playback;
pub mod render;

pub use backend::{
    AudioDevices, CaptureBackend, MicrophoneConstraints, PlaybackEnded, PlaybackOutput,
    CAPTURE_CHANNEL_CAPACITY,
};
pub use capture::{process_block, BlockOutcome, CaptureGate};
pub use file::{AudioFile, WavCapture, WavFileDevices};
pub use pcm::PcmError;
pub use playback::{PlaybackScheduler, ScheduledFrame, DEFAULT_SPEAKING_TOLERANCE_SECS};
pub use render::WavPlaybackOutput;
