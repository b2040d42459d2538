//! The chat-log collaborator.

/// Who a chat-log line is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// Connection and device notices.
    System,
    /// The remote assistant.
    Ai,
    /// The local user.
    You,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "System"),
            Self::Ai => write!(f, "AI"),
            Self::You => write!(f, "You"),
        }
    }
}

/// Receives lines for display.
pub trait UiSink {
    /// Show `text` attributed to `speaker`.
    fn append(&mut self, speaker: Speaker, text: &str);
}

/// Prints the chat log to stdout.
#[derive(Debug, Default)]
pub struct ConsoleUi;

impl UiSink for ConsoleUi {
    fn append(&mut self, speaker: Speaker, text: &str) {
        println!("{speaker}: {text}");
    }
}

/// Fixed notices shown by the session.
pub mod notices {
    /// Channel opened.
    pub const CONNECTED: &str = "connected";
    /// Channel closed.
    pub const DISCONNECTED: &str = "disconnected";
    /// Channel failed.
    pub const CONNECTION_ERROR: &str = "connection error";
    /// Microphone or camera could not be opened.
    pub const DEVICE_FAILED: &str = "device access failed, please check permissions";
    /// Auto-close warning.
    pub const CLOSING_SOON: &str = "session will close in 1 minute";
    /// Auto-close fired.
    pub const TIME_LIMIT: &str = "session time limit reached";
    /// Text typed while not connected.
    pub const NOT_CONNECTED: &str = "not connected";
    /// Camera toggle requested without a camera.
    pub const NO_CAMERA: &str = "camera is not enabled";
    /// The other camera could not be opened.
    pub const CAMERA_SWITCH_FAILED: &str = "could not switch camera";
}
