//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate, mixes to mono,
//! downsamples to the outbound rate and re-slices the result into
//! fixed-size frames for the capture pipeline.

use crate::config::CaptureConfig;
use crate::error::{LiveError, Result};
use crate::pipeline::messages::AudioFrame;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// A source of microphone frames.
///
/// Implementations deliver frames from their own threads via `tx` and must
/// stop delivering after [`stop`](Self::stop).
pub trait AudioInput {
    /// Start delivering frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened.
    fn start(&mut self, tx: mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Stop the device. Idempotent.
    fn stop(&mut self);
}

/// Audio capture from the system microphone via cpal.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
    frame_size: usize,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// Open the configured (or default) input device.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then converts to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device is available.
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| LiveError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| LiveError::Audio(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| LiveError::Audio("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| LiveError::Audio(format!("no default input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            native_rate, native_channels
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            frame_size: config.frame_size,
            stream: None,
        })
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
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

impl AudioInput for CpalCapture {
    fn start(&mut self, tx: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let mut assembler = FrameAssembler::new(self.frame_size);

        let stream = self
            .device
            .build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };

                    let samples = if native_rate != target_rate {
                        downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };

                    for samples in assembler.push(&samples) {
                        // Never block the audio thread.
                        if tx.try_send(AudioFrame { samples }).is_err() {
                            debug!("audio frame channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| LiveError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| LiveError::Audio(format!("failed to start input stream: {e}")))?;

        info!(
            "audio capture started: native {}Hz -> target {}Hz, {} samples/frame",
            native_rate, target_rate, self.frame_size
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("audio capture stopped");
        }
    }
}

/// Re-slices arbitrary device buffers into frames of exactly `frame_size`.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler emitting frames of `frame_size` samples (min 1).
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.frame_size)
            .map(<[f32]>::to_vec)
            .collect()
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Speech energy sits below 8kHz, so 48kHz → 16kHz needs no anti-alias filter.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}
