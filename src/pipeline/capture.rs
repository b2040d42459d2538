//! Turns microphone frames and camera polls into outbound messages.
//!
//! Audio: every frame is measured for silence and forwarded as PCM16, unless
//! remote audio is playing (half-duplex). A long enough silent run emits
//! `turn_complete` ahead of the frame's audio.
//!
//! Video: each poll grabs and encodes a frame only when the throttle allows.

use crate::audio::silence::{SilenceDetector, mean_abs_volume};
use crate::channel::protocol::OutboundMessage;
use crate::codec;
use crate::config::{CaptureConfig, VideoConfig};
use crate::error::Result;
use crate::video::camera::Camera;
use crate::video::jpeg;
use crate::video::throttle::FrameThrottle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Playback state relevant to the microphone gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackActivity {
    /// A segment is audible right now.
    pub playing: bool,
    /// When playback last went idle.
    pub last_finished_at: Option<Instant>,
}

/// Mutes the microphone while remote audio plays, plus an optional tail.
#[derive(Debug, Clone, Copy)]
pub struct HalfDuplexGate {
    tail: Duration,
}

impl HalfDuplexGate {
    /// Create a gate that stays closed for `tail` after playback ends.
    pub fn new(tail: Duration) -> Self {
        Self { tail }
    }

    /// Whether microphone audio may be processed at `now`.
    pub fn is_open(&self, activity: PlaybackActivity, now: Instant) -> bool {
        if activity.playing {
            return false;
        }
        match activity.last_finished_at {
            Some(at) => now.saturating_duration_since(at) >= self.tail,
            None => true,
        }
    }
}

/// Outbound side of a session.
#[derive(Debug)]
pub struct CapturePipeline {
    silence: SilenceDetector,
    gate: HalfDuplexGate,
    throttle: FrameThrottle,
    jpeg_quality: u8,
    max_dimension: u32,
    muted: bool,
    /// Consecutive failed video polls.
    video_failures: u32,
}

impl CapturePipeline {
    /// Build the pipeline from capture and video settings.
    pub fn new(capture: &CaptureConfig, video: &VideoConfig) -> Self {
        Self {
            silence: SilenceDetector::from_config(capture),
            gate: HalfDuplexGate::new(capture.echo_tail()),
            throttle: FrameThrottle::new(video.frame_capture_interval()),
            jpeg_quality: video.jpeg_quality,
            max_dimension: video.max_dimension,
            muted: false,
            video_failures: 0,
        }
    }

    /// Process one microphone frame captured at `now`.
    ///
    /// Returns the messages to send, in order: possibly `turn_complete`,
    /// then the frame's audio. Returns nothing while the gate is closed.
    pub fn process_audio_frame(
        &mut self,
        samples: &[f32],
        playback: PlaybackActivity,
        now: Instant,
    ) -> Vec<OutboundMessage> {
        if !self.gate.is_open(playback, now) {
            if !self.muted {
                debug!("microphone muted during playback");
                self.muted = true;
                // A silent run cannot span the assistant's reply.
                self.silence.reset();
            }
            return Vec::new();
        }
        if self.muted {
            debug!("microphone unmuted");
            self.muted = false;
        }

        let mut out = Vec::with_capacity(2);
        let volume = mean_abs_volume(samples);
        if self.silence.observe(volume, now) {
            info!("silence detected, ending turn");
            out.push(OutboundMessage::turn_complete());
        }
        out.push(OutboundMessage::audio(&codec::float_to_pcm16(samples)));
        out
    }

    /// Poll the camera at `now`; returns a frame message when one is due.
    pub fn poll_video(&mut self, camera: &mut Camera, now: Instant) -> Option<OutboundMessage> {
        if !self.throttle.is_due(now) {
            return None;
        }
        match self.capture_jpeg(camera) {
            Ok(bytes) => {
                self.throttle.mark_captured(now);
                self.video_failures = 0;
                debug!("captured video frame ({} bytes)", bytes.len());
                Some(OutboundMessage::image(&bytes))
            }
            Err(e) => {
                if self.video_failures == 0 {
                    warn!("error capturing video frame: {e}");
                } else {
                    debug!("error capturing video frame: {e}");
                }
                self.video_failures = self.video_failures.saturating_add(1);
                None
            }
        }
    }

    fn capture_jpeg(&self, camera: &mut Camera) -> Result<Vec<u8>> {
        let frame = camera.grab_frame()?;
        jpeg::encode_jpeg(frame, self.jpeg_quality, self.max_dimension)
    }

    /// Let the next poll capture right away, e.g. after the camera changed.
    pub fn on_camera_switched(&mut self) {
        self.throttle.reset();
    }

    /// Whether the half-duplex gate is currently holding back audio.
    pub fn is_muted(&self) -> bool {
        self.muted
    }
}
