//! Message types passed between the session and its devices.

/// A fixed-size frame of microphone samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples at the outbound sample rate.
    pub samples: Vec<f32>,
}

/// Identifies one playback segment handed to an audio sink.
///
/// Ids increase monotonically for the lifetime of a scheduler, so an event
/// that refers to a segment from before a reset never matches the current
/// in-flight segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub u64);

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion notifications from an audio sink.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The segment played to the end.
    Finished {
        /// Segment that completed.
        segment: SegmentId,
    },
    /// The output stream failed while playing the segment.
    Failed {
        /// Segment that was playing.
        segment: SegmentId,
        /// Device error description.
        reason: String,
    },
}

impl PlaybackEvent {
    /// Segment the event refers to.
    pub fn segment(&self) -> SegmentId {
        match self {
            Self::Finished { segment } | Self::Failed { segment, .. } => *segment,
        }
    }
}

/// User requests delivered to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Send a chat message.
    SendText(String),
    /// Switch between front and rear camera.
    ToggleCamera,
}
