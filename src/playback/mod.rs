//! Inbound audio buffering and playback scheduling.

pub mod jitter;
pub mod scheduler;
