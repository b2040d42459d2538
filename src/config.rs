//! Configuration types for a streaming session.

use crate::error::{LiveError, Result};
use crate::video::camera::CameraFacing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Remote endpoint settings.
    pub server: ServerConfig,
    /// Microphone capture and silence detection.
    pub capture: CaptureConfig,
    /// Camera snapshot settings.
    pub video: VideoConfig,
    /// Playback jitter buffer settings.
    pub playback: PlaybackConfig,
    /// Session lifetime settings.
    pub session: SessionConfig,
}

/// Where the duplex channel connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host (and optional port) of the conversational service.
    pub host: String,
    /// Path of the channel endpoint on the host.
    pub path: String,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
    /// Full WebSocket URL. Overrides `host`, `path` and `secure` when set.
    pub url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8000".to_owned(),
            path: "/ws".to_owned(),
            secure: false,
            url: None,
        }
    }
}

/// Microphone capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Outbound sample rate in Hz.
    pub input_sample_rate: u32,
    /// Samples per analysed/transmitted frame.
    pub frame_size: usize,
    /// Mean absolute amplitude below which a frame counts as silent.
    ///
    /// Samples are f32 in \[-1, 1\]; 0.01 suits a quiet room.
    pub silence_threshold: f32,
    /// Continuous silence in ms that ends the user's turn.
    pub silence_duration_ms: u64,
    /// Extra time in ms after playback ends during which the microphone
    /// stays muted. 0 reopens the microphone as soon as playback finishes.
    pub echo_tail_ms: u64,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            frame_size: 512,
            silence_threshold: 0.01,
            silence_duration_ms: 1_000,
            echo_tail_ms: 0,
            input_device: None,
        }
    }
}

impl CaptureConfig {
    /// Silence run length that emits `turn_complete`.
    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    /// Microphone mute window after playback ends.
    pub fn echo_tail(&self) -> Duration {
        Duration::from_millis(self.echo_tail_ms)
    }
}

/// Camera snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Whether camera frames are sent at all.
    pub enabled: bool,
    /// Minimum time in ms between two transmitted frames.
    pub frame_capture_interval_ms: u64,
    /// How often in ms the capture loop wakes up to check the throttle.
    pub poll_interval_ms: u64,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Frames larger than this on their longest side are scaled down.
    pub max_dimension: u32,
    /// Camera used when the session starts.
    pub facing: CameraFacing,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_capture_interval_ms: 2_000,
            poll_interval_ms: 16,
            jpeg_quality: 80,
            max_dimension: 1_024,
            facing: CameraFacing::default(),
        }
    }
}

impl VideoConfig {
    /// Minimum spacing of transmitted frames.
    pub fn frame_capture_interval(&self) -> Duration {
        Duration::from_millis(self.frame_capture_interval_ms)
    }

    /// Wake-up period of the capture loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Playback jitter buffer configuration.
///
/// Thresholds are in samples at `output_sample_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Inbound sample rate in Hz.
    pub output_sample_rate: u32,
    /// Below this many queued samples everything is flushed immediately.
    pub min_samples: usize,
    /// Preferred segment size once enough audio is queued.
    pub optimal_samples: usize,
    /// Hard upper bound on a single segment.
    pub max_samples: usize,
    /// Linear gain applied after normalization.
    pub gain: f32,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 24_000,
            min_samples: 4_800,
            optimal_samples: 24_576,
            max_samples: 32_768,
            gain: 0.8,
            output_device: None,
        }
    }
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes after opening before the channel closes itself.
    ///
    /// A warning is shown one minute before the close.
    pub auto_close_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_close_minutes: 5,
        }
    }
}

impl LiveConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| LiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render the configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LiveError::Config(e.to_string()))
    }

    /// Returns the default config file path.
    ///
    /// Resolves to `dirs::config_dir()/duplex-live/config.toml`. Override the
    /// directory with `DUPLEX_LIVE_CONFIG_DIR`.
    pub fn default_config_path() -> PathBuf {
        let dir = match std::env::var_os("DUPLEX_LIVE_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|d| d.join("duplex-live"))
                .unwrap_or_else(|| PathBuf::from("/tmp/duplex-live-config")),
        };
        dir.join("config.toml")
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LiveError::Config(msg.to_owned()));

        if self.capture.input_sample_rate == 0 {
            return invalid("capture.input_sample_rate must be positive");
        }
        if self.capture.frame_size == 0 {
            return invalid("capture.frame_size must be positive");
        }
        if self.capture.silence_threshold.is_nan() || self.capture.silence_threshold < 0.0 {
            return invalid("capture.silence_threshold must be non-negative");
        }
        if self.video.enabled && self.video.frame_capture_interval_ms == 0 {
            return invalid("video.frame_capture_interval_ms must be positive");
        }
        if self.video.poll_interval_ms == 0 {
            return invalid("video.poll_interval_ms must be positive");
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return invalid("video.jpeg_quality must be within 1..=100");
        }
        if self.playback.output_sample_rate == 0 {
            return invalid("playback.output_sample_rate must be positive");
        }
        if self.playback.optimal_samples == 0 || self.playback.max_samples == 0 {
            return invalid("playback thresholds must be positive");
        }
        if self.playback.min_samples > self.playback.optimal_samples {
            return invalid("playback.min_samples must not exceed playback.optimal_samples");
        }
        if self.playback.gain.is_nan() || self.playback.gain <= 0.0 || self.playback.gain > 1.0 {
            return invalid("playback.gain must be within (0, 1]");
        }
        if self.session.auto_close_minutes == 0 {
            return invalid("session.auto_close_minutes must be at least 1");
        }
        Ok(())
    }
}
