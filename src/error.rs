//! Error types for the duplex-live client.

/// Top-level error type for a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Camera acquisition or frame capture error.
    #[error("video error: {0}")]
    Video(String),

    /// PCM / base64 / JPEG conversion error.
    #[error("codec error: {0}")]
    Codec(String),

    /// Duplex channel (WebSocket) error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed wire message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A session is already connecting or open.
    #[error("a session is already active ({0})")]
    AlreadyActive(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LiveError>;
