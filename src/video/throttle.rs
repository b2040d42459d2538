//! Rate limiting for outbound camera frames.

use std::time::{Duration, Instant};

/// Allows one capture per interval.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_capture: Option<Instant>,
}

impl FrameThrottle {
    /// Create a throttle that is immediately due.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_capture: None,
        }
    }

    /// Whether a frame should be captured at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_capture {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record a successful capture at `now`.
    pub fn mark_captured(&mut self, now: Instant) {
        self.last_capture = Some(now);
    }

    /// Make the next poll due again.
    pub fn reset(&mut self) {
        self.last_capture = None;
    }
}
