//! Adaptive jitter buffer for inbound PCM chunks.
//!
//! Chunks arrive at irregular sizes and intervals. The buffer keeps them in
//! arrival order and hands out playback segments sized by [`FlushPolicy`]:
//! everything when little is queued (no startup gap), a capped segment when
//! a backlog builds up (bounded latency).

use crate::config::PlaybackConfig;
use std::collections::VecDeque;

/// Which sizing rule produced a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTier {
    /// Less than the minimum was queued; flushed anyway to avoid starving.
    BelowMinimum,
    /// Between minimum and optimal; everything flushed.
    Drain,
    /// More than optimal; the segment was capped and the rest stays queued.
    Capped,
}

/// Segment sizing thresholds, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Below this everything queued is flushed regardless.
    pub min_samples: usize,
    /// Up to this everything queued is flushed.
    pub optimal_samples: usize,
    /// Upper bound on a capped segment.
    pub max_samples: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

impl FlushPolicy {
    /// Build the policy from playback settings.
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            optimal_samples: config.optimal_samples,
            max_samples: config.max_samples,
        }
    }

    /// Number of samples to flush when `available` are queued.
    pub fn plan(&self, available: usize) -> (usize, FlushTier) {
        if available < self.min_samples {
            (available, FlushTier::BelowMinimum)
        } else if available <= self.optimal_samples {
            (available, FlushTier::Drain)
        } else {
            (self.optimal_samples.min(self.max_samples), FlushTier::Capped)
        }
    }
}

/// FIFO queue of PCM16 chunks awaiting playback.
#[derive(Debug, Clone, Default)]
pub struct JitterBuffer {
    policy: FlushPolicy,
    chunks: VecDeque<Vec<i16>>,
    /// Total samples across `chunks`.
    available: usize,
}

impl JitterBuffer {
    /// Create an empty buffer.
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            chunks: VecDeque::new(),
            available: 0,
        }
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<i16>) {
        if chunk.is_empty() {
            return;
        }
        self.available += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total queued samples.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Number of queued chunks (a split chunk counts once).
    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Remove the next playback segment according to the flush policy.
    ///
    /// Returns `None` when nothing is queued.
    pub fn next_segment(&mut self) -> Option<(Vec<i16>, FlushTier)> {
        if self.is_empty() {
            return None;
        }
        let (target, tier) = self.policy.plan(self.available);
        // A zero cap would never drain the queue.
        Some((self.take(target.max(1)), tier))
    }

    /// Remove up to `count` samples from the front of the queue.
    ///
    /// A chunk straddling the boundary is split; its tail stays at the head
    /// of the queue.
    pub fn take(&mut self, count: usize) -> Vec<i16> {
        let mut out = Vec::with_capacity(count.min(self.available));

        while out.len() < count {
            let remaining = count - out.len();
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= remaining {
                if let Some(chunk) = self.chunks.pop_front() {
                    out.extend_from_slice(&chunk);
                }
            } else {
                out.extend(front.drain(..remaining));
            }
        }

        self.available -= out.len();
        out
    }

    /// Drop everything queued. Returns the number of samples discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.available;
        self.chunks.clear();
        self.available = 0;
        dropped
    }
}
