//! Energy-based end-of-turn detection.
//!
//! A frame is silent when its mean absolute amplitude falls below the
//! threshold. A contiguous silent run lasting at least the configured
//! duration ends the user's turn. Any loud frame restarts the run; there is
//! no smoothing beyond the raw threshold.

use crate::config::CaptureConfig;
use std::time::{Duration, Instant};

/// Mean absolute amplitude of a frame.
pub fn mean_abs_volume(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Tracks the onset of the current silent run.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    duration: Duration,
    /// When the current silent run began, if one is in progress.
    onset: Option<Instant>,
}

impl SilenceDetector {
    /// Create a detector with an explicit threshold and run length.
    pub fn new(threshold: f32, duration: Duration) -> Self {
        Self {
            threshold,
            duration,
            onset: None,
        }
    }

    /// Create a detector from capture settings.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.silence_threshold, config.silence_duration())
    }

    /// Feed one frame's volume observed at `now`.
    ///
    /// Returns `true` exactly once per qualifying silent run, at which point
    /// the tracker is cleared and a fresh full-length run is required for the
    /// next event.
    pub fn observe(&mut self, volume: f32, now: Instant) -> bool {
        if volume >= self.threshold {
            self.onset = None;
            return false;
        }

        match self.onset {
            None => {
                self.onset = Some(now);
                false
            }
            Some(start) if now.saturating_duration_since(start) >= self.duration => {
                self.onset = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Whether a silent run is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.onset.is_some()
    }

    /// Forget any run in progress.
    pub fn reset(&mut self) {
        self.onset = None;
    }
}
