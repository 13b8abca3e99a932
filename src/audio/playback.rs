//! Gapless playback scheduling for inbound agent audio
//!
//! Frames arrive as separate messages at irregular times. Each one is placed
//! at `max(output_clock, cursor)` and the cursor moves to the end of that
//! frame, so frames queue back to back without overlapping and never start in
//! the past. A frame that arrives after the queue has drained starts
//! immediately, leaving an audible but bounded gap.

use tracing::{debug, warn};

use super::pcm;

/// Default window within which the output clock is considered to have
/// caught up with the cursor
pub const DEFAULT_SPEAKING_TOLERANCE_SECS: f64 = 0.1;

/// A decoded frame with its place on the output clock
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFrame {
    pub samples: Vec<f32>,
    /// Start time on the output clock, seconds
    pub start: f64,
    /// Duration, seconds
    pub duration: f64,
    /// True when this frame flipped the agent into the speaking state
    pub started_speaking: bool,
}

impl ScheduledFrame {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    tolerance: f64,
    cursor: f64,
    speaking: bool,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, tolerance: f64) -> Self {
        Self {
            sample_rate,
            tolerance,
            cursor: 0.0,
            speaking: false,
        }
    }

    /// Decode and place one inbound frame.
    ///
    /// Returns `None` for empty or undecodable payloads; the cursor is left
    /// untouched in that case.
    pub fn schedule(&mut self, payload: &[u8], now: f64) -> Option<ScheduledFrame> {
        if !now.is_finite() {
            warn!("Ignoring audio frame: output clock reads {}", now);
            return None;
        }

        let samples = match pcm::decode_frame(payload) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Ignoring audio frame: {}", e);
                return None;
            }
        };

        let duration = pcm::duration_secs(samples.len(), self.sample_rate);
        let start = now.max(self.cursor);
        self.cursor = start + duration;

        let started_speaking = !self.speaking;
        self.speaking = true;

        debug!(
            "Scheduled {} samples at {:.3}s ({:.3}s), cursor now {:.3}s",
            samples.len(),
            start,
            duration,
            self.cursor
        );

        Some(ScheduledFrame {
            samples,
            start,
            duration,
            started_speaking,
        })
    }

    /// Handle an end-of-playback notification.
    ///
    /// Returns true when this notification cleared the speaking state, i.e.
    /// nothing further is queued.
    pub fn frame_ended(&mut self, now: f64) -> bool {
        if self.speaking && now >= self.cursor - self.tolerance {
            self.speaking = false;
            return true;
        }
        false
    }

    /// Force the speaking state off (teardown)
    pub fn silence(&mut self) -> bool {
        std::mem::replace(&mut self.speaking, false)
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}
