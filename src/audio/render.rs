// Playback output that renders scheduled agent speech to a WAV file
//
// The output clock runs in wall time from the moment the output is opened.
// Each scheduled buffer is written onto a sample timeline at its start time,
// so gaps between frames show up as silence exactly where a listener would
// have heard them. The timeline is flushed to disk when the output closes.

use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{PlaybackEnded, PlaybackOutput};
use super::pcm;

type Writer = hound::WavWriter<BufWriter<File>>;

struct Timeline {
    samples: Vec<f32>,
    writer: Option<Writer>,
    buffers_scheduled: usize,
}

pub struct WavPlaybackOutput {
    path: PathBuf,
    sample_rate: u32,
    origin: Instant,
    timeline: Mutex<Timeline>,
    ended_tx: mpsc::UnboundedSender<PlaybackEnded>,
}

impl WavPlaybackOutput {
    pub fn create(
        path: impl AsRef<Path>,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<PlaybackEnded>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if sample_rate == 0 {
            bail!("Playback sample rate must be positive");
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Playback output rendering to {} ({}Hz)", path.display(), sample_rate);

        Ok(Self {
            path,
            sample_rate,
            origin: Instant::now(),
            timeline: Mutex::new(Timeline {
                samples: Vec::new(),
                writer: Some(writer),
                buffers_scheduled: 0,
            }),
            ended_tx,
        })
    }

    /// Path of the rendered file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl PlaybackOutput for WavPlaybackOutput {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<()> {
        if !start_at.is_finite() || start_at < 0.0 {
            bail!("Invalid playback start time {}", start_at);
        }

        let duration = pcm::duration_secs(samples.len(), self.sample_rate);

        {
            let mut timeline = self
                .timeline
                .lock()
                .map_err(|_| anyhow!("Playback timeline lock poisoned"))?;

            if timeline.writer.is_none() {
                bail!("Playback output is closed");
            }

            let offset = (start_at * self.sample_rate as f64).round() as usize;
            let end = offset + samples.len();
            if timeline.samples.len() < end {
                timeline.samples.resize(end, 0.0);
            }
            timeline.samples[offset..end].copy_from_slice(&samples);
            timeline.buffers_scheduled += 1;
        }

        // Deliver the end-of-buffer notification when the buffer would finish
        let end = start_at + duration;
        let delay = (end - self.now()).max(0.0);
        let ended_tx = self.ended_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            let _ = ended_tx.send(PlaybackEnded { start: start_at, end });
        });

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let (writer, samples, buffers) = {
            let mut timeline = self
                .timeline
                .lock()
                .map_err(|_| anyhow!("Playback timeline lock poisoned"))?;
            match timeline.writer.take() {
                Some(writer) => (
                    writer,
                    std::mem::take(&mut timeline.samples),
                    timeline.buffers_scheduled,
                ),
                None => return Ok(()),
            }
        };

        write_timeline(writer, &samples)?;

        info!(
            "Playback output closed: {} buffers, {:.1}s rendered to {}",
            buffers,
            pcm::duration_secs(samples.len(), self.sample_rate),
            self.path.display()
        );

        Ok(())
    }

    fn name(&self) -> &str {
        "WAV file speaker"
    }
}

fn write_timeline(mut writer: Writer, samples: &[f32]) -> Result<()> {
    for sample in pcm::encode_block(samples) {
        writer
            .write_sample(sample)
            .context("Failed to write sample to WAV")?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}

impl Drop for WavPlaybackOutput {
    fn drop(&mut self) {
        let Ok(mut timeline) = self.timeline.lock() else {
            return;
        };
        if let Some(writer) = timeline.writer.take() {
            debug!("Playback output dropped without close, flushing timeline");
            let samples = std::mem::take(&mut timeline.samples);
            if let Err(e) = write_timeline(writer, &samples) {
                warn!("Failed to finalize WAV output on drop: {}", e);
            }
        }
    }
}
