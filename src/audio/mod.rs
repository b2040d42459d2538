//! Microphone capture, speaker playback, and silence detection.

pub mod capture;
pub mod playback;
pub mod silence;
