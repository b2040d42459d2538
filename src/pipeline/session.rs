//! The live session: one channel, its devices, and the event loop tying them
//! together.
//!
//! All session state is owned by a single task. Device callbacks and the
//! socket task only forward owned messages into it, so no state is shared
//! across threads. The loop ends once the transport reports `Closed` (or a
//! local close is not acknowledged within [`CLOSE_GRACE`]).

use crate::audio::capture::AudioInput;
use crate::audio::playback::AudioSink;
use crate::channel::lifecycle::{AutoCloseEvent, ChannelLifecycle};
use crate::channel::protocol::{InboundMessage, OutboundMessage};
use crate::channel::transport::TransportHandle;
use crate::channel::{ChannelState, CloseReason, Transport, TransportEvent};
use crate::codec;
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::pipeline::capture::{CapturePipeline, PlaybackActivity};
use crate::pipeline::messages::{AudioFrame, PlaybackEvent, SessionCommand};
use crate::playback::scheduler::PlaybackScheduler;
use crate::ui::{Speaker, UiSink, notices};
use crate::video::camera::{Camera, CameraProvider};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a local close may wait for the transport to confirm.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Microphone frames buffered between the device thread and the session.
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Current time on the runtime clock, which tests can pause and advance.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Collaborators a session is assembled from.
pub struct SessionParts<S: AudioSink> {
    /// The duplex channel, already connecting.
    pub transport: Transport,
    /// Microphone.
    pub microphone: Box<dyn AudioInput>,
    /// Camera provider; `None` runs the session without video.
    pub camera: Option<Box<dyn CameraProvider>>,
    /// Speaker output.
    pub sink: S,
    /// Completion events emitted by `sink`.
    pub playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    /// Chat log.
    pub ui: Box<dyn UiSink>,
}

/// Cloneable control surface for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    state: watch::Receiver<ChannelState>,
}

impl SessionHandle {
    /// Send a chat message.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.commands.send(SessionCommand::SendText(text.into()));
    }

    /// Switch between front and rear camera.
    pub fn toggle_camera(&self) {
        let _ = self.commands.send(SessionCommand::ToggleCamera);
    }

    /// Close the channel and end the session.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Wait until the channel state changes. Returns the new state, or
    /// `None` once the session is gone.
    pub async fn state_changed(&mut self) -> Option<ChannelState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }
}

/// Guards against running two sessions at once.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<watch::Receiver<ChannelState>>,
}

impl SessionSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if the tracked session is still connecting or open.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::AlreadyActive`] while the tracked session is active.
    pub fn ensure_available(&self) -> Result<()> {
        match &self.current {
            Some(state) if state.borrow().is_active() => Err(LiveError::AlreadyActive(format!(
                "a session is already {}",
                *state.borrow()
            ))),
            _ => Ok(()),
        }
    }

    /// Track `handle`'s session as the current one.
    pub fn track(&mut self, handle: &SessionHandle) {
        self.current = Some(handle.state.clone());
    }
}

/// A live session. Drive it with [`run`](Self::run).
pub struct Session<S: AudioSink> {
    config: LiveConfig,
    lifecycle: ChannelLifecycle,
    transport: TransportHandle,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    microphone: Box<dyn AudioInput>,
    audio_rx: mpsc::Receiver<AudioFrame>,
    camera: Option<Camera>,
    capture: CapturePipeline,
    scheduler: PlaybackScheduler<S>,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ui: Box<dyn UiSink>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ChannelState>,
    close_reason: Option<CloseReason>,
    close_deadline: Option<Instant>,
    devices_released: bool,
}

impl<S: AudioSink> Session<S> {
    /// Open the devices and prepare the session loop.
    ///
    /// Device access happens before any message is exchanged. If the
    /// microphone or the camera cannot be opened the user is told, the
    /// transport is closed, and no session is created.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Config`] for an invalid configuration, before
    /// any device is touched, or the device error if acquisition fails.
    pub fn start(config: LiveConfig, parts: SessionParts<S>) -> Result<(Self, SessionHandle)> {
        let SessionParts {
            transport,
            mut microphone,
            camera,
            sink,
            playback_events,
            mut ui,
        } = parts;

        if let Err(e) = config.validate() {
            transport.handle.close();
            return Err(e);
        }

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let devices = microphone.start(audio_tx).and_then(|()| match camera {
            Some(provider) if config.video.enabled => {
                Camera::open(provider, config.video.facing).map(Some)
            }
            _ => Ok(None),
        });
        let camera = match devices {
            Ok(camera) => camera,
            Err(e) => {
                warn!("device access failed: {e}");
                microphone.stop();
                ui.append(Speaker::System, notices::DEVICE_FAILED);
                transport.handle.close();
                return Err(e);
            }
        };
        if camera.is_none() {
            info!("video disabled for this session");
        }

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let cancel = CancellationToken::new();

        let session = Self {
            lifecycle: ChannelLifecycle::new(config.session.auto_close_minutes),
            transport: transport.handle,
            transport_events: transport.events,
            microphone,
            audio_rx,
            camera,
            capture: CapturePipeline::new(&config.capture, &config.video),
            scheduler: PlaybackScheduler::new(sink, &config.playback),
            playback_events,
            ui,
            commands,
            cancel: cancel.clone(),
            state_tx,
            close_reason: None,
            close_deadline: None,
            devices_released: false,
            config,
        };
        let handle = SessionHandle {
            commands: command_tx,
            cancel,
            state: state_rx,
        };
        Ok((session, handle))
    }

    /// Run until the channel is closed. Returns why it closed.
    ///
    /// # Errors
    ///
    /// Currently infallible once started; the `Result` leaves room for
    /// loop-level failures.
    pub async fn run(mut self) -> Result<CloseReason> {
        let mut video_tick = tokio::time::interval(self.config.video.poll_interval());
        video_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut commands_open = true;
        let mut audio_open = true;
        let mut playback_open = true;

        while self.lifecycle.state() != ChannelState::Closed {
            let deadline = self.next_deadline().map(tokio::time::Instant::from_std);
            let video_active = self.lifecycle.is_open()
                && self.camera.as_ref().is_some_and(Camera::is_active);
            let stoppable = self.lifecycle.state().is_active();

            tokio::select! {
                () = self.cancel.cancelled(), if stoppable => {
                    info!("stop requested");
                    self.close_locally(CloseReason::Local);
                }
                event = self.transport_events.recv() => {
                    self.on_transport_event(event.unwrap_or(TransportEvent::Closed));
                }
                event = self.playback_events.recv(), if playback_open => match event {
                    Some(event) => self.scheduler.on_event(event),
                    None => playback_open = false,
                },
                frame = self.audio_rx.recv(), if audio_open => match frame {
                    Some(frame) => self.on_audio_frame(&frame),
                    None => audio_open = false,
                },
                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => commands_open = false,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() => {
                    self.on_deadline();
                }
                _ = video_tick.tick(), if video_active => {
                    self.on_video_tick();
                }
            }
        }

        let reason = self.close_reason.take().unwrap_or(CloseReason::Remote);
        info!("session ended: {reason}");
        Ok(reason)
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.lifecycle.state() {
            ChannelState::Open => self.lifecycle.next_deadline(),
            ChannelState::Closing => self.close_deadline,
            ChannelState::Connecting | ChannelState::Closed => None,
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.lifecycle.state());
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.lifecycle.on_open(clock_now()) {
                    self.ui.append(Speaker::System, notices::CONNECTED);
                    self.publish_state();
                }
            }
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(e) => {
                warn!("channel error: {e}");
                self.ui.append(Speaker::System, notices::CONNECTION_ERROR);
                self.close_reason.get_or_insert(CloseReason::Error(e));
            }
            TransportEvent::Closed => self.finish(),
        }
    }

    fn on_message(&mut self, text: &str) {
        if !self.lifecycle.is_open() {
            debug!("dropping message received in state {}", self.lifecycle.state());
            return;
        }
        match InboundMessage::parse(text) {
            Ok(InboundMessage::Text { content }) => self.ui.append(Speaker::Ai, &content),
            Ok(InboundMessage::Audio { content }) => match codec::decode_pcm16(&content) {
                Ok(pcm) => self.scheduler.on_chunk_arrived(pcm),
                Err(e) => warn!("dropping undecodable audio chunk: {e}"),
            },
            Ok(InboundMessage::Unknown) => debug!("ignoring message of unknown type"),
            Err(e) => debug!("ignoring malformed message: {e}"),
        }
    }

    fn on_audio_frame(&mut self, frame: &AudioFrame) {
        if !self.lifecycle.is_open() {
            return;
        }
        let activity = PlaybackActivity {
            playing: self.scheduler.is_playing(),
            last_finished_at: self.scheduler.last_finished_at(),
        };
        for msg in self
            .capture
            .process_audio_frame(&frame.samples, activity, clock_now())
        {
            self.send(&msg);
        }
    }

    fn on_video_tick(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if let Some(msg) = self.capture.poll_video(camera, clock_now()) {
            self.send(&msg);
        }
    }

    fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SendText(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                if !self.lifecycle.is_open() {
                    self.ui.append(Speaker::System, notices::NOT_CONNECTED);
                    return;
                }
                self.send(&OutboundMessage::text(text));
                self.ui.append(Speaker::You, text);
            }
            SessionCommand::ToggleCamera => match self.camera.as_mut() {
                Some(camera) => match camera.toggle_facing() {
                    Ok(_) => {
                        info!("switched to {} camera", camera.facing());
                        self.capture.on_camera_switched();
                    }
                    Err(e) => {
                        warn!("camera switch failed: {e}");
                        self.ui.append(Speaker::System, notices::CAMERA_SWITCH_FAILED);
                    }
                },
                None => self.ui.append(Speaker::System, notices::NO_CAMERA),
            },
        }
    }

    fn on_deadline(&mut self) {
        let now = clock_now();
        if self.lifecycle.state() == ChannelState::Closing {
            if self.close_deadline.is_some_and(|at| now >= at) {
                warn!("transport did not confirm close, ending session");
                self.finish();
            }
            return;
        }
        while let Some(event) = self.lifecycle.poll_timer(now) {
            match event {
                AutoCloseEvent::Warn => {
                    info!("session closes in one minute");
                    self.ui.append(Speaker::System, notices::CLOSING_SOON);
                }
                AutoCloseEvent::Close => {
                    info!("session time limit reached");
                    self.ui.append(Speaker::System, notices::TIME_LIMIT);
                    self.close_locally(CloseReason::AutoClose);
                }
            }
        }
    }

    /// Serialize and queue `msg`. Dropped unless the channel is open.
    fn send(&mut self, msg: &OutboundMessage) {
        if !self.lifecycle.is_open() {
            debug!("channel not open, dropping {} message", msg.kind());
            return;
        }
        match msg.to_json() {
            Ok(json) => {
                if !self.transport.send(json) {
                    debug!("transport gone, dropping {} message", msg.kind());
                }
            }
            Err(e) => warn!("failed to encode {} message: {e}", msg.kind()),
        }
    }

    fn close_locally(&mut self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        info!("closing channel ({reason})");
        self.close_reason.get_or_insert(reason);
        self.close_deadline = Some(clock_now() + CLOSE_GRACE);
        self.transport.close();
        self.release_devices();
        self.publish_state();
    }

    /// Stop capture and discard pending playback. Idempotent.
    fn release_devices(&mut self) {
        if self.devices_released {
            return;
        }
        self.devices_released = true;
        self.microphone.stop();
        if let Some(camera) = self.camera.as_mut() {
            camera.stop();
        }
        self.scheduler.reset();
    }

    fn finish(&mut self) {
        if self.lifecycle.state() == ChannelState::Closed {
            return;
        }
        self.lifecycle.on_closed();
        self.release_devices();
        self.ui.append(Speaker::System, notices::DISCONNECTED);
        self.publish_state();
    }
}
