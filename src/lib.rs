//! duplex-live: a real-time voice and video client for a conversational
//! assistant service.
//!
//! One session holds one WebSocket channel. Microphone audio streams up as
//! PCM16 while the user talks; a sustained silence ends the turn. Camera
//! snapshots go up every couple of seconds. The service answers with text
//! and PCM16 speech, which is buffered and played one segment at a time.
//!
//! # Architecture
//!
//! - **Audio capture**: records from the microphone via `cpal`, framed for the wire
//! - **Silence detection**: mean-absolute energy with a minimum run length
//! - **Video**: camera snapshots, throttled and JPEG-encoded
//! - **Channel**: JSON messages over `tokio-tungstenite`, with an auto-close timer
//! - **Playback**: jitter buffer plus a single-flight scheduler into `cpal`
//!
//! A [`Session`] owns all of the above and runs them from one event loop.

pub mod audio;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod playback;
pub mod ui;
pub mod video;

pub use channel::{ChannelState, CloseReason, Transport};
pub use config::LiveConfig;
pub use error::{LiveError, Result};
pub use pipeline::session::{Session, SessionHandle, SessionParts, SessionSlot};
pub use ui::{ConsoleUi, Speaker, UiSink};
