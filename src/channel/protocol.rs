//! JSON wire messages exchanged over the duplex channel.
//!
//! Media goes out as `{mime_type, content}` objects; control and chat
//! messages are tagged by `type`. Inbound messages are always tagged and
//! unknown tags are tolerated.

use crate::codec;
use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};

/// MIME type of outbound microphone audio.
pub const MIME_PCM: &str = "audio/pcm";
/// MIME type of outbound camera frames.
pub const MIME_JPEG: &str = "image/jpeg";

/// Messages sent from client to service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// A media payload, base64-encoded.
    Media {
        /// `audio/pcm` or `image/jpeg`.
        mime_type: &'static str,
        /// Base64 payload.
        content: String,
    },
    /// A tagged control or chat message.
    Control(ControlMessage),
}

/// Tagged client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// The user finished speaking.
    TurnComplete,
    /// A typed chat message.
    Text {
        /// Message body.
        content: String,
    },
}

impl OutboundMessage {
    /// Microphone audio frame.
    pub fn audio(samples: &[i16]) -> Self {
        Self::Media {
            mime_type: MIME_PCM,
            content: codec::encode_pcm16(samples),
        }
    }

    /// Camera snapshot.
    pub fn image(jpeg: &[u8]) -> Self {
        Self::Media {
            mime_type: MIME_JPEG,
            content: codec::encode_base64(jpeg),
        }
    }

    /// End-of-turn signal.
    pub fn turn_complete() -> Self {
        Self::Control(ControlMessage::TurnComplete)
    }

    /// Chat message.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Control(ControlMessage::Text {
            content: content.into(),
        })
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Media { mime_type, .. } => mime_type,
            Self::Control(ControlMessage::TurnComplete) => "turn_complete",
            Self::Control(ControlMessage::Text { .. }) => "text",
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Protocol`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LiveError::Protocol(e.to_string()))
    }
}

/// Messages received from the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Assistant text for the chat log.
    Text {
        /// Message body.
        content: String,
    },
    /// Assistant speech, base64 PCM16 at the playback rate.
    Audio {
        /// Base64 payload.
        content: String,
    },
    /// Any tag this client does not know.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Protocol`] for unparsable or untagged frames.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LiveError::Protocol(e.to_string()))
    }
}
