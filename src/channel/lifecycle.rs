//! Channel state machine and the idle auto-close timer.
//!
//! `Connecting → Open → {Closing → Closed | Closed}`. Opening arms a
//! two-stage timer (warning one minute before the close); leaving `Open`
//! for any reason disarms it.

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// State of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress.
    Connecting,
    /// Ready to exchange messages.
    Open,
    /// Local close requested, waiting for the transport to finish.
    Closing,
    /// Finished; the session is over.
    Closed,
}

impl ChannelState {
    /// Whether this state blocks starting another session.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The user stopped the session.
    Local,
    /// The service closed the channel.
    Remote,
    /// The auto-close timer expired.
    AutoClose,
    /// The channel failed.
    Error(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "closed locally"),
            Self::Remote => write!(f, "closed by server"),
            Self::AutoClose => write!(f, "closed after time limit"),
            Self::Error(e) => write!(f, "failed: {e}"),
        }
    }
}

/// A fired auto-close deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCloseEvent {
    /// One minute left.
    Warn,
    /// Time is up.
    Close,
}

/// Warn/close deadlines for one open channel.
#[derive(Debug, Clone)]
pub struct AutoCloseTimer {
    warn_at: Option<Instant>,
    close_at: Option<Instant>,
}

impl AutoCloseTimer {
    /// Lead time of the warning before the close.
    pub const WARNING_LEAD: Duration = Duration::from_secs(60);

    /// Arm both deadlines relative to `opened_at`.
    pub fn arm(opened_at: Instant, minutes: u32) -> Self {
        let close_at = opened_at + Duration::from_secs(u64::from(minutes) * 60);
        let warn_at = close_at
            .checked_sub(Self::WARNING_LEAD)
            .map_or(opened_at, |at| at.max(opened_at));
        Self {
            warn_at: Some(warn_at),
            close_at: Some(close_at),
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.warn_at.or(self.close_at)
    }

    /// Fire the next due deadline, if any. Each fires at most once.
    pub fn poll(&mut self, now: Instant) -> Option<AutoCloseEvent> {
        if let Some(at) = self.warn_at {
            if now >= at {
                self.warn_at = None;
                return Some(AutoCloseEvent::Warn);
            }
            return None;
        }
        match self.close_at {
            Some(at) if now >= at => {
                self.close_at = None;
                Some(AutoCloseEvent::Close)
            }
            _ => None,
        }
    }

    /// Whether any deadline is still pending.
    pub fn is_armed(&self) -> bool {
        self.warn_at.is_some() || self.close_at.is_some()
    }
}

/// Tracks channel state and owns the auto-close timer.
#[derive(Debug, Clone)]
pub struct ChannelLifecycle {
    state: ChannelState,
    timer: Option<AutoCloseTimer>,
    auto_close_minutes: u32,
}

impl ChannelLifecycle {
    /// A channel that is connecting.
    pub fn new(auto_close_minutes: u32) -> Self {
        Self {
            state: ChannelState::Connecting,
            timer: None,
            auto_close_minutes,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether messages may be sent.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// The handshake completed. Arms the timer.
    ///
    /// Returns `false` (and changes nothing) unless the channel was connecting.
    pub fn on_open(&mut self, now: Instant) -> bool {
        if self.state != ChannelState::Connecting {
            debug!("ignoring open event in state {}", self.state);
            return false;
        }
        self.state = ChannelState::Open;
        self.timer = Some(AutoCloseTimer::arm(now, self.auto_close_minutes));
        info!(
            "channel open, auto-close in {} minutes",
            self.auto_close_minutes
        );
        true
    }

    /// A local close was requested. Disarms the timer.
    ///
    /// Returns `false` if the channel was already closing or closed.
    pub fn begin_close(&mut self) -> bool {
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {
                self.state = ChannelState::Closing;
                self.timer = None;
                true
            }
            ChannelState::Closing | ChannelState::Closed => false,
        }
    }

    /// The transport is gone. Disarms the timer.
    pub fn on_closed(&mut self) {
        self.state = ChannelState::Closed;
        self.timer = None;
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.as_ref().and_then(AutoCloseTimer::next_deadline)
    }

    /// Fire a due timer deadline.
    pub fn poll_timer(&mut self, now: Instant) -> Option<AutoCloseEvent> {
        if self.state != ChannelState::Open {
            return None;
        }
        self.timer.as_mut().and_then(|t| t.poll(now))
    }
}
