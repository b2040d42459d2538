//! Audio playback to system speakers via cpal.
//!
//! Each playback segment gets its own output stream. The stream reports
//! completion through a [`PlaybackEvent`] channel and is dropped when the
//! scheduler releases the segment.

use crate::config::PlaybackConfig;
use crate::error::{LiveError, Result};
use crate::pipeline::messages::{PlaybackEvent, SegmentId};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// An audio output that plays one segment at a time.
///
/// `start` must return promptly; completion (or failure) of the segment is
/// reported asynchronously as a [`PlaybackEvent`] carrying the same id.
pub trait AudioSink {
    /// Begin playing normalized mono `samples`.
    ///
    /// `Finished` is sent one device period after the last samples were
    /// handed to the output, so releasing the stream on completion does not
    /// cut off the tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be started. No event is sent
    /// for a segment whose start failed.
    fn start(&mut self, segment: SegmentId, samples: Vec<f32>) -> Result<()>;

    /// Release the output instance that played `segment`.
    fn release(&mut self, segment: SegmentId);

    /// Silence and release everything immediately.
    fn stop_all(&mut self);
}

/// Audio playback to system speakers via cpal.
pub struct CpalPlayback {
    device: cpal::Device,
    stream_config: StreamConfig,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    active: Option<(SegmentId, cpal::Stream)>,
}

impl CpalPlayback {
    /// Open the configured (or default) output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(
        config: &PlaybackConfig,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| LiveError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| LiveError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| LiveError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            events,
            active: None,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| LiveError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioSink for CpalPlayback {
    fn start(&mut self, segment: SegmentId, samples: Vec<f32>) -> Result<()> {
        // A previous stream still held here has already reported completion.
        self.active = None;

        let buffer = Arc::new(Mutex::new(SegmentBuffer {
            samples,
            position: 0,
            notified: false,
        }));

        let buffer_clone = Arc::clone(&buffer);
        let finished_tx = self.events.clone();
        let failed_tx = self.events.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };

                    if buf.fill(data) {
                        let _ = finished_tx.send(PlaybackEvent::Finished { segment });
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                    let _ = failed_tx.send(PlaybackEvent::Failed {
                        segment,
                        reason: err.to_string(),
                    });
                },
                None,
            )
            .map_err(|e| LiveError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| LiveError::Audio(format!("failed to start output stream: {e}")))?;

        self.active = Some((segment, stream));
        Ok(())
    }

    fn release(&mut self, segment: SegmentId) {
        if self.active.as_ref().is_some_and(|(id, _)| *id == segment) {
            self.active = None;
            debug!("released output stream for segment {segment}");
        }
    }

    fn stop_all(&mut self) {
        if let Some((segment, _stream)) = self.active.take() {
            debug!("stopped output stream for segment {segment}");
        }
    }
}

/// Samples of one segment and the callback's read position.
struct SegmentBuffer {
    samples: Vec<f32>,
    position: usize,
    notified: bool,
}

impl SegmentBuffer {
    /// Fill one device period. Returns `true` exactly once, from the first
    /// period that starts with every sample already handed to the device,
    /// so the period holding the tail has been played out before the
    /// stream can be dropped.
    fn fill(&mut self, data: &mut [f32]) -> bool {
        let drained = self.position >= self.samples.len();
        for sample in data.iter_mut() {
            if self.position < self.samples.len() {
                *sample = self.samples[self.position];
                self.position += 1;
            } else {
                *sample = 0.0;
            }
        }

        if drained && !self.notified {
            self.notified = true;
            return true;
        }
        false
    }
}
