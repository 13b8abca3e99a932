use crate::error::SessionResult;
use anyhow::Result;
use tokio::sync::mpsc;

/// Capacity of the channel between a capture device and the capture task.
/// Devices use `try_send`; a full channel drops the block rather than blocking
/// the device callback.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 8;

/// Constraints requested when opening the microphone
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneConstraints {
    /// Capture sample rate in Hz (the device is opened at this rate, no resampling)
    pub sample_rate: u32,
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Samples per capture block
    pub block_size: usize,
    /// Ask the device for echo cancellation
    pub echo_cancellation: bool,
    /// Ask the device for noise suppression
    pub noise_suppression: bool,
}

impl Default for MicrophoneConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Agent speaks and listens at 16kHz
            channels: 1,        // Mono
            block_size: 4096,   // 256ms at 16kHz
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Notification that one scheduled playback buffer finished playing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackEnded {
    /// Scheduled start of the buffer, in output clock seconds
    pub start: f64,
    /// End of the buffer, in output clock seconds
    pub end: f64,
}

/// Microphone capture backend
///
/// Implementations deliver fixed-size blocks of normalized f32 samples.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive capture blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio output able to schedule buffers at arbitrary future timestamps
#[async_trait::async_trait]
pub trait PlaybackOutput: Send + Sync {
    /// Current output clock in seconds since the output was opened
    fn now(&self) -> f64;

    /// Schedule mono samples to start playing at `start_at` (output clock seconds).
    ///
    /// A `PlaybackEnded` notification is delivered once the buffer has played.
    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<()>;

    /// Close the output. Already scheduled audio is not truncated.
    async fn close(&self) -> Result<()>;

    /// Get output name for logging
    fn name(&self) -> &str;
}

/// Local device capabilities consumed by a session
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone. Fails with `DeviceAccessDenied`.
    async fn open_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> SessionResult<Box<dyn CaptureBackend>>;

    /// Open the playback output. Fails with `AudioInitFailed`.
    ///
    /// End-of-buffer notifications are sent on `ended_tx`.
    async fn open_playback(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<PlaybackEnded>,
    ) -> SessionResult<std::sync::Arc<dyn PlaybackOutput>>;
}
