use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{
    AudioDevices, CaptureBackend, MicrophoneConstraints, PlaybackEnded, PlaybackOutput,
    CAPTURE_CHANNEL_CAPACITY,
};
use super::render::WavPlaybackOutput;
use crate::error::{SessionError, SessionResult};

/// A WAV file loaded as normalized mono-or-interleaved f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => bail!("Unsupported WAV sample format: {:?} {}-bit", format, bits),
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file as if it were a live microphone.
///
/// Blocks are paced at the real-time cadence of `block_size / sample_rate`.
/// Once the file is exhausted the "microphone" keeps delivering silence until
/// stopped, like an open device in a quiet room.
pub struct WavCapture {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    block_size: usize,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavCapture {
    /// Open a capture over a loaded file, checking it matches the constraints
    pub fn new(audio: AudioFile, constraints: &MicrophoneConstraints) -> Result<Self> {
        if audio.sample_rate != constraints.sample_rate || audio.channels != constraints.channels {
            bail!(
                "{} is {}Hz/{}ch, capture requires {}Hz/{}ch",
                audio.path,
                audio.sample_rate,
                audio.channels,
                constraints.sample_rate,
                constraints.channels
            );
        }
        if constraints.block_size == 0 {
            bail!("Capture block size must be positive");
        }

        Ok(Self {
            samples: Arc::new(audio.samples),
            sample_rate: constraints.sample_rate,
            block_size: constraints.block_size,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl CaptureBackend for WavCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let samples = Arc::clone(&self.samples);
        let block_size = self.block_size;
        let period = Duration::from_secs_f64(block_size as f64 / self.sample_rate as f64);
        let capturing = Arc::clone(&self.capturing);

        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut offset = 0usize;

            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let block = if offset < samples.len() {
                    let end = (offset + block_size).min(samples.len());
                    let mut block = samples[offset..end].to_vec();
                    block.resize(block_size, 0.0);
                    offset = end;
                    block
                } else {
                    vec![0.0; block_size]
                };

                match tx.try_send(block) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Capture consumer is behind, dropping block");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Capture consumer went away");
                        break;
                    }
                }
            }
        });

        self.task = Some(task);

        info!(
            "WAV capture started ({} samples, {} per block)",
            self.samples.len(),
            self.block_size
        );

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            info!("WAV capture stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "WAV file microphone"
    }
}

/// Devices backed by WAV files: input replays a recording, output renders the
/// agent's speech onto a timeline file
#[derive(Debug, Clone)]
pub struct WavFileDevices {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl WavFileDevices {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl AudioDevices for WavFileDevices {
    async fn open_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> SessionResult<Box<dyn CaptureBackend>> {
        debug!(
            "Requesting microphone: {}Hz, {}ch, echo_cancellation={}, noise_suppression={}",
            constraints.sample_rate,
            constraints.channels,
            constraints.echo_cancellation,
            constraints.noise_suppression
        );

        let audio = AudioFile::open(&self.input_path)
            .map_err(|e| SessionError::DeviceAccessDenied(format!("{:#}", e)))?;
        let capture = WavCapture::new(audio, constraints)
            .map_err(|e| SessionError::DeviceAccessDenied(format!("{:#}", e)))?;

        Ok(Box::new(capture))
    }

    async fn open_playback(
        &self,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<PlaybackEnded>,
    ) -> SessionResult<Arc<dyn PlaybackOutput>> {
        let output = WavPlaybackOutput::create(&self.output_path, sample_rate, ended_tx)
            .map_err(|e| SessionError::AudioInitFailed(format!("{:#}", e)))?;

        Ok(Arc::new(output))
    }
}
