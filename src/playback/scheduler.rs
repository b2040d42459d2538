//! Single-flight playback scheduler.
//!
//! At most one segment is handed to the [`AudioSink`] at a time. The
//! in-flight guard is set before a segment starts and cleared only by that
//! segment's completion or failure event, which then drains the next segment.
//! Draining is an explicit loop, so a burst of failing starts never recurses.

use crate::audio::playback::AudioSink;
use crate::codec;
use crate::config::PlaybackConfig;
use crate::pipeline::messages::{PlaybackEvent, SegmentId};
use crate::playback::jitter::{FlushPolicy, JitterBuffer};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Owns the playback queue and the sink it drains into.
pub struct PlaybackScheduler<S: AudioSink> {
    buffer: JitterBuffer,
    sink: S,
    gain: f32,
    in_flight: Option<SegmentId>,
    next_segment: u64,
    /// When the most recent segment finished or failed.
    last_finished_at: Option<Instant>,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    /// Create an idle scheduler.
    pub fn new(sink: S, config: &PlaybackConfig) -> Self {
        Self {
            buffer: JitterBuffer::new(FlushPolicy::from_config(config)),
            sink,
            gain: config.gain,
            in_flight: None,
            next_segment: 0,
            last_finished_at: None,
        }
    }

    /// Queue an inbound chunk and start playback if idle.
    pub fn on_chunk_arrived(&mut self, chunk: Vec<i16>) {
        self.buffer.push(chunk);
        self.drain();
    }

    /// Handle a sink completion event.
    ///
    /// Events for anything other than the in-flight segment are stale (the
    /// scheduler was reset since) and are ignored.
    pub fn on_event(&mut self, event: PlaybackEvent) {
        let segment = event.segment();
        if self.in_flight != Some(segment) {
            debug!("ignoring stale playback event for segment {segment}");
            return;
        }

        if let PlaybackEvent::Failed { reason, .. } = &event {
            warn!("playback of segment {segment} failed: {reason}");
        }

        self.in_flight = None;
        self.last_finished_at = Some(tokio::time::Instant::now().into_std());
        self.sink.release(segment);
        self.drain();
    }

    /// Start queued segments until one is in flight or the queue is empty.
    fn drain(&mut self) {
        while self.in_flight.is_none() {
            let Some((pcm, tier)) = self.buffer.next_segment() else {
                return;
            };

            let segment = SegmentId(self.next_segment);
            self.next_segment += 1;

            let samples = codec::pcm16_to_float(&pcm, self.gain);
            self.in_flight = Some(segment);
            debug!(
                "playing segment {segment}: {} samples ({tier:?}), {} still queued",
                samples.len(),
                self.buffer.available()
            );

            if let Err(e) = self.sink.start(segment, samples) {
                error!("error starting playback of segment {segment}: {e}");
                self.in_flight = None;
                self.last_finished_at = Some(tokio::time::Instant::now().into_std());
            }
        }
    }

    /// Discard queued audio and stop the segment in flight.
    ///
    /// Completion events that arrive afterwards are ignored.
    pub fn reset(&mut self) {
        let dropped = self.buffer.clear();
        if self.in_flight.take().is_some() || dropped > 0 {
            debug!("playback reset, discarded {dropped} queued samples");
        }
        self.sink.stop_all();
    }

    /// Whether a segment is currently playing.
    pub fn is_playing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Segment currently playing.
    pub fn in_flight(&self) -> Option<SegmentId> {
        self.in_flight
    }

    /// Samples waiting behind the in-flight segment.
    pub fn queued_samples(&self) -> usize {
        self.buffer.available()
    }

    /// When playback last went idle, if ever.
    pub fn last_finished_at(&self) -> Option<Instant> {
        self.last_finished_at
    }

    /// Access the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}
