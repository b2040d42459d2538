//! Integration tests for the live session.
//!
//! A session is driven end to end against an in-memory transport and fake
//! devices: the test plays the part of the service (injecting transport
//! events and reading what the session sent) and of the audio hardware
//! (pushing microphone frames and reporting playback completion).

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use duplex_live::audio::capture::AudioInput;
use duplex_live::audio::playback::AudioSink;
use duplex_live::channel::{TransportCommand, TransportEvent, TransportPeer};
use duplex_live::codec;
use duplex_live::pipeline::messages::{AudioFrame, PlaybackEvent, SegmentId};
use duplex_live::ui::notices;
use duplex_live::video::camera::{CameraFacing, CameraProvider, VideoSource};
use duplex_live::{
    ChannelState, CloseReason, LiveConfig, LiveError, Session, SessionHandle, SessionParts,
    SessionSlot, Speaker, Transport, UiSink,
};
use image::RgbImage;
use serde_json::Value;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

type Lines = Arc<Mutex<Vec<(Speaker, String)>>>;

struct RecordingUi {
    lines: Lines,
}

impl UiSink for RecordingUi {
    fn append(&mut self, speaker: Speaker, text: &str) {
        self.lines.lock().unwrap().push((speaker, text.to_owned()));
    }
}

#[derive(Default)]
struct MicState {
    tx: Option<mpsc::Sender<AudioFrame>>,
    stopped: bool,
}

struct FakeMic {
    state: Arc<Mutex<MicState>>,
    fail: bool,
}

impl AudioInput for FakeMic {
    fn start(&mut self, tx: mpsc::Sender<AudioFrame>) -> duplex_live::Result<()> {
        if self.fail {
            return Err(LiveError::Audio("permission denied".into()));
        }
        self.state.lock().unwrap().tx = Some(tx);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.tx = None;
        state.stopped = true;
    }
}

#[derive(Default)]
struct SinkLog {
    started: Vec<(SegmentId, Vec<f32>)>,
    stop_all_calls: usize,
}

struct FakeSink {
    log: Arc<Mutex<SinkLog>>,
}

impl AudioSink for FakeSink {
    fn start(&mut self, segment: SegmentId, samples: Vec<f32>) -> duplex_live::Result<()> {
        self.log.lock().unwrap().started.push((segment, samples));
        Ok(())
    }

    fn release(&mut self, _segment: SegmentId) {}

    fn stop_all(&mut self) {
        self.log.lock().unwrap().stop_all_calls += 1;
    }
}

struct GreyCamera;

impl VideoSource for GreyCamera {
    fn grab_frame(&mut self) -> duplex_live::Result<RgbImage> {
        Ok(RgbImage::from_pixel(16, 12, image::Rgb([128, 128, 128])))
    }

    fn stop(&mut self) {}
}

struct GreyCameraProvider;

impl CameraProvider for GreyCameraProvider {
    fn acquire(&mut self, _facing: CameraFacing) -> duplex_live::Result<Box<dyn VideoSource>> {
        Ok(Box::new(GreyCamera))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    peer: TransportPeer,
    handle: SessionHandle,
    mic: Arc<Mutex<MicState>>,
    sink: Arc<Mutex<SinkLog>>,
    playback_tx: mpsc::UnboundedSender<PlaybackEvent>,
    lines: Lines,
}

struct Options {
    camera: bool,
    mic_fails: bool,
}

const AUDIO_ONLY: Options = Options {
    camera: false,
    mic_fails: false,
};

fn start(options: Options) -> (duplex_live::Result<(Session<FakeSink>, SessionHandle)>, Parts) {
    start_with(LiveConfig::default(), options)
}

fn start_with(
    config: LiveConfig,
    options: Options,
) -> (duplex_live::Result<(Session<FakeSink>, SessionHandle)>, Parts) {
    let (transport, peer) = Transport::in_memory();
    let mic = Arc::new(Mutex::new(MicState::default()));
    let sink = Arc::new(Mutex::new(SinkLog::default()));
    let lines: Lines = Arc::new(Mutex::new(Vec::new()));
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();

    let camera: Option<Box<dyn CameraProvider>> = if options.camera {
        Some(Box::new(GreyCameraProvider))
    } else {
        None
    };
    let parts = SessionParts {
        transport,
        microphone: Box::new(FakeMic {
            state: Arc::clone(&mic),
            fail: options.mic_fails,
        }),
        camera,
        sink: FakeSink {
            log: Arc::clone(&sink),
        },
        playback_events: playback_rx,
        ui: Box::new(RecordingUi {
            lines: Arc::clone(&lines),
        }),
    };
    let result = Session::start(config, parts);
    (
        result,
        Parts {
            peer,
            mic,
            sink,
            playback_tx,
            lines,
        },
    )
}

/// Everything but the session handle, for tests where start fails.
struct Parts {
    peer: TransportPeer,
    mic: Arc<Mutex<MicState>>,
    sink: Arc<Mutex<SinkLog>>,
    playback_tx: mpsc::UnboundedSender<PlaybackEvent>,
    lines: Lines,
}

fn harness(options: Options) -> (Session<FakeSink>, Harness) {
    let (result, parts) = start(options);
    let (session, handle) = result.unwrap();
    (
        session,
        Harness {
            peer: parts.peer,
            handle,
            mic: parts.mic,
            sink: parts.sink,
            playback_tx: parts.playback_tx,
            lines: parts.lines,
        },
    )
}

/// Let the session drain whatever is ready.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

impl Harness {
    async fn open(&mut self) {
        self.peer.events.send(TransportEvent::Opened).unwrap();
        while self.handle.state() != ChannelState::Open {
            self.handle
                .state_changed()
                .await
                .expect("session ended before opening");
        }
    }

    fn inject(&self, json: &str) {
        self.peer
            .events
            .send(TransportEvent::Message(json.to_owned()))
            .unwrap();
    }

    fn inject_audio(&self, pcm: &[i16]) {
        let content = codec::encode_pcm16(pcm);
        self.inject(&format!(r#"{{"type":"audio","content":"{content}"}}"#));
    }

    async fn speak(&self, samples: Vec<f32>) {
        let tx = self.mic.lock().unwrap().tx.clone().expect("microphone running");
        tx.send(AudioFrame { samples }).await.unwrap();
    }

    /// Next JSON frame the session sent.
    async fn next_sent(&mut self) -> Value {
        match self.peer.commands.recv().await {
            Some(TransportCommand::Send(json)) => serde_json::from_str(&json).unwrap(),
            other => panic!("expected a sent message, got {other:?}"),
        }
    }

    /// Every frame sent so far, without waiting.
    fn drain_sent(&mut self) -> Vec<Value> {
        let mut sent = Vec::new();
        while let Ok(cmd) = self.peer.commands.try_recv() {
            match cmd {
                TransportCommand::Send(json) => sent.push(serde_json::from_str(&json).unwrap()),
                TransportCommand::Close => panic!("unexpected close"),
            }
        }
        sent
    }

    async fn expect_close(&mut self) {
        loop {
            match self.peer.commands.recv().await {
                Some(TransportCommand::Close) => return,
                Some(TransportCommand::Send(_)) => {}
                None => panic!("transport dropped without close"),
            }
        }
    }

    /// Stop locally and acknowledge the close like a well-behaved server.
    async fn shutdown(&mut self) {
        self.handle.stop();
        self.expect_close().await;
        self.peer.events.send(TransportEvent::Closed).unwrap();
    }

    fn finish_playing(&self) {
        let segment = self
            .sink
            .lock()
            .unwrap()
            .started
            .last()
            .map(|(id, _)| *id)
            .expect("a segment was started");
        self.playback_tx
            .send(PlaybackEvent::Finished { segment })
            .unwrap();
    }

    fn lines(&self) -> Vec<(Speaker, String)> {
        self.lines.lock().unwrap().clone()
    }

    fn has_line(&self, speaker: Speaker, text: &str) -> bool {
        self.lines().iter().any(|(s, t)| *s == speaker && t == text)
    }
}

fn is_pcm(msg: &Value) -> bool {
    msg["mime_type"] == "audio/pcm"
}

fn is_jpeg(msg: &Value) -> bool {
    msg["mime_type"] == "image/jpeg"
}

fn is_turn_complete(msg: &Value) -> bool {
    msg["type"] == "turn_complete"
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn open_announces_connection_and_publishes_state() {
    let (session, mut h) = harness(AUDIO_ONLY);
    assert_eq!(h.handle.state(), ChannelState::Connecting);

    let script = async {
        h.open().await;
        assert!(h.has_line(Speaker::System, notices::CONNECTED));
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    assert_eq!(reason.unwrap(), CloseReason::Local);
    assert_eq!(h.handle.state(), ChannelState::Closed);
    assert_eq!(h.lines().last().unwrap().1, notices::DISCONNECTED);
}

#[tokio::test(start_paused = true)]
async fn remote_close_releases_devices_and_playback() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.inject_audio(&[100; 480]);
        settle().await;
        assert_eq!(h.sink.lock().unwrap().started.len(), 1);
        h.peer.events.send(TransportEvent::Closed).unwrap();
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    assert_eq!(reason.unwrap(), CloseReason::Remote);
    assert!(h.mic.lock().unwrap().stopped);
    assert_eq!(h.sink.lock().unwrap().stop_all_calls, 1);
    assert!(h.has_line(Speaker::System, notices::DISCONNECTED));
}

#[tokio::test(start_paused = true)]
async fn connection_error_is_reported_and_ends_session() {
    let (session, h) = harness(AUDIO_ONLY);

    let script = async {
        h.peer
            .events
            .send(TransportEvent::Error("refused".into()))
            .unwrap();
        h.peer.events.send(TransportEvent::Closed).unwrap();
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    assert_eq!(reason.unwrap(), CloseReason::Error("refused".into()));
    assert!(h.has_line(Speaker::System, notices::CONNECTION_ERROR));
    assert!(!h.has_line(Speaker::System, notices::CONNECTED));
}

#[tokio::test]
async fn device_failure_prevents_session_and_closes_transport() {
    let (result, mut parts) = start(Options {
        camera: false,
        mic_fails: true,
    });

    assert!(matches!(result, Err(LiveError::Audio(_))));
    assert_eq!(
        parts.lines.lock().unwrap().as_slice(),
        &[(Speaker::System, notices::DEVICE_FAILED.to_owned())]
    );
    assert_eq!(parts.peer.commands.recv().await, Some(TransportCommand::Close));
    let mic = parts.mic.lock().unwrap();
    assert!(mic.tx.is_none());
    assert!(mic.stopped);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_devices_open() {
    let mut config = LiveConfig::default();
    config.video.poll_interval_ms = 0;
    let (result, mut parts) = start_with(config, AUDIO_ONLY);

    assert!(matches!(result, Err(LiveError::Config(_))));
    assert_eq!(parts.peer.commands.recv().await, Some(TransportCommand::Close));
    assert!(parts.mic.lock().unwrap().tx.is_none());
    assert!(parts.lines.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_close_ends_after_grace_period() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.handle.stop();
        h.expect_close().await;
        // The server never confirms.
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    assert_eq!(reason.unwrap(), CloseReason::Local);
    assert_eq!(h.handle.state(), ChannelState::Closed);
}

#[tokio::test(start_paused = true)]
async fn slot_rejects_second_session_until_first_closes() {
    let (session, mut h) = harness(AUDIO_ONLY);
    let mut slot = SessionSlot::new();
    slot.track(&h.handle);
    assert!(matches!(
        slot.ensure_available(),
        Err(LiveError::AlreadyActive(_))
    ));

    let script = async {
        h.open().await;
        assert!(slot.ensure_available().is_err());
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    reason.unwrap();
    assert!(slot.ensure_available().is_ok());
}

// ---------------------------------------------------------------------------
// Auto-close
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn auto_close_warns_at_four_minutes_and_closes_at_five() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;

        tokio::time::sleep(Duration::from_secs(239)).await;
        assert!(!h.has_line(Speaker::System, notices::CLOSING_SOON));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.has_line(Speaker::System, notices::CLOSING_SOON));
        assert!(!h.has_line(Speaker::System, notices::TIME_LIMIT));

        tokio::time::sleep(Duration::from_secs(58)).await;
        assert!(!h.has_line(Speaker::System, notices::TIME_LIMIT));

        h.expect_close().await;
        assert!(h.has_line(Speaker::System, notices::TIME_LIMIT));
        h.peer.events.send(TransportEvent::Closed).unwrap();
    };
    let (reason, ()) = tokio::join!(session.run(), script);

    assert_eq!(reason.unwrap(), CloseReason::AutoClose);
    let warnings = h
        .lines()
        .iter()
        .filter(|(_, t)| t == notices::CLOSING_SOON)
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test(start_paused = true)]
async fn manual_stop_before_limit_suppresses_auto_close() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    assert_eq!(reason.unwrap(), CloseReason::Local);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(!h.has_line(Speaker::System, notices::CLOSING_SOON));
    assert!(!h.has_line(Speaker::System, notices::TIME_LIMIT));
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn assistant_text_appears_in_chat_log() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.inject(r#"{"type":"text","content":"Hello! How can I help?"}"#);
        settle().await;
        assert!(h.has_line(Speaker::Ai, "Hello! How can I help?"));
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_and_malformed_messages_are_ignored() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.inject(r#"{"type":"status","content":"thinking"}"#);
        h.inject("not json at all");
        h.inject(r#"{"content":"no type"}"#);
        h.inject(r####"{"type":"audio","content":"###"}"####);
        h.inject(r#"{"type":"text","content":"still here"}"#);
        settle().await;

        let ai: Vec<_> = h
            .lines()
            .into_iter()
            .filter(|(s, _)| *s == Speaker::Ai)
            .collect();
        assert_eq!(ai, vec![(Speaker::Ai, "still here".to_owned())]);
        assert!(h.sink.lock().unwrap().started.is_empty());
        assert_eq!(h.handle.state(), ChannelState::Open);
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn inbound_audio_plays_one_segment_at_a_time_in_order() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.inject_audio(&[1; 300]);
        h.inject_audio(&[2; 200]);
        h.inject_audio(&[3; 100]);
        settle().await;
        assert_eq!(h.sink.lock().unwrap().started.len(), 1);

        h.finish_playing();
        settle().await;
        assert_eq!(h.sink.lock().unwrap().started.len(), 2);

        h.finish_playing();
        settle().await;
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();

    let gain = LiveConfig::default().playback.gain;
    let log = h.sink.lock().unwrap();
    let played: Vec<i16> = log
        .started
        .iter()
        .flat_map(|(_, samples)| samples.iter().map(|s| (s / gain * 32_768.0).round() as i16))
        .collect();
    let mut expected = vec![1i16; 300];
    expected.extend(vec![2i16; 200]);
    expected.extend(vec![3i16; 100]);
    assert_eq!(played, expected);
    assert_eq!(log.started[0].1.len(), 300);
    assert_eq!(log.started[1].1.len(), 300);
}

// ---------------------------------------------------------------------------
// Outbound audio and text
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn microphone_frames_are_sent_only_while_open() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.speak(vec![0.5; 512]).await;
        settle().await;
        assert!(h.drain_sent().is_empty());

        h.open().await;
        h.speak(vec![0.5; 512]).await;
        let msg = h.next_sent().await;
        assert!(is_pcm(&msg));
        let pcm = codec::decode_pcm16(msg["content"].as_str().unwrap()).unwrap();
        assert_eq!(pcm.len(), 512);
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sustained_silence_ends_the_turn_once() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        for _ in 0..15 {
            h.speak(vec![0.0; 512]).await;
            settle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        settle().await;

        let sent = h.drain_sent();
        let turns: Vec<usize> = sent
            .iter()
            .enumerate()
            .filter(|(_, m)| is_turn_complete(m))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(turns.len(), 1, "sent: {sent:?}");
        // The turn ends ahead of that frame's audio.
        assert!(is_pcm(&sent[turns[0] + 1]));
        assert_eq!(sent.iter().filter(|m| is_pcm(m)).count(), 15);
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn microphone_is_muted_while_assistant_speaks() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.inject_audio(&[500; 2400]);
        settle().await;

        h.speak(vec![0.5; 512]).await;
        settle().await;
        assert!(h.drain_sent().is_empty());

        h.finish_playing();
        settle().await;
        h.speak(vec![0.5; 512]).await;
        assert!(is_pcm(&h.next_sent().await));
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn typed_text_is_trimmed_sent_and_echoed() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.handle.send_text("   ");
        h.handle.send_text("  what's on my desk?  ");
        let msg = h.next_sent().await;
        assert_eq!(msg["type"], "text");
        assert_eq!(msg["content"], "what's on my desk?");
        assert!(h.has_line(Speaker::You, "what's on my desk?"));
        assert_eq!(
            h.lines().iter().filter(|(s, _)| *s == Speaker::You).count(),
            1
        );
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn text_before_open_is_not_sent() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.handle.send_text("hello?");
        settle().await;
        assert!(h.drain_sent().is_empty());
        assert!(h.has_line(Speaker::System, notices::NOT_CONNECTED));
        assert!(!h.has_line(Speaker::You, "hello?"));
        h.open().await;
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn video_frames_are_sent_every_two_seconds() {
    let (session, mut h) = harness(Options {
        camera: true,
        mic_fails: false,
    });

    let script = async {
        h.open().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let frames = h.drain_sent().iter().filter(|m| is_jpeg(m)).count();
        assert_eq!(frames, 3);
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn camera_toggle_sends_a_frame_from_the_new_camera_right_away() {
    let (session, mut h) = harness(Options {
        camera: true,
        mic_fails: false,
    });

    let script = async {
        h.open().await;
        // Frames at 0s, 2s and 4s; the next one is not due until 6s.
        tokio::time::sleep(Duration::from_secs(5)).await;
        h.drain_sent();

        h.handle.toggle_camera();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frames = h.drain_sent().iter().filter(|m| is_jpeg(m)).count();
        assert_eq!(frames, 1);
        assert!(!h.has_line(Speaker::System, notices::CAMERA_SWITCH_FAILED));
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}

#[tokio::test(start_paused = true)]
async fn camera_toggle_without_camera_is_reported() {
    let (session, mut h) = harness(AUDIO_ONLY);

    let script = async {
        h.open().await;
        h.handle.toggle_camera();
        settle().await;
        assert!(h.has_line(Speaker::System, notices::NO_CAMERA));
        h.shutdown().await;
    };
    let (reason, ()) = tokio::join!(session.run(), script);
    reason.unwrap();
}
