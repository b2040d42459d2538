//! CLI binary for duplex-live.

use clap::{Parser, Subcommand};
use duplex_live::audio::capture::CpalCapture;
use duplex_live::audio::playback::CpalPlayback;
use duplex_live::channel::endpoint::endpoint_url;
use duplex_live::pipeline::messages::PlaybackEvent;
use duplex_live::ui::notices;
use duplex_live::video::camera::CameraProvider;
use duplex_live::{
    CloseReason, ConsoleUi, LiveConfig, Session, SessionParts, SessionSlot, Speaker, Transport,
    UiSink,
};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// duplex-live: talk to a conversational assistant with voice and video.
#[derive(Parser)]
#[command(name = "duplex-live", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket URL of the service (overrides the config).
    #[arg(long)]
    url: Option<String>,

    /// Run without the camera.
    #[arg(long)]
    no_video: bool,

    /// Also write logs to a daily rolling file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a live session.
    Chat,

    /// List available audio devices.
    Devices,

    /// Print the effective configuration.
    Config {
        /// Write it to the config path instead of printing.
        #[arg(long)]
        write: bool,
    },
}

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Text(String),
    Camera,
    Start,
    Stop,
    Quit,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "/camera" => Input::Camera,
        "/start" => Input::Start,
        "/stop" => Input::Stop,
        "/quit" | "/exit" => Input::Quit,
        text => Input::Text(text.to_owned()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = duplex_live::logging::init_tracing(cli.log_dir.as_deref());

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(LiveConfig::default_config_path);
    let mut config = if cli.config.is_some() || config_path.exists() {
        LiveConfig::from_file(&config_path)?
    } else {
        LiveConfig::default()
    };
    if let Some(url) = cli.url {
        config.server.url = Some(url);
    }
    if cli.no_video {
        config.video.enabled = false;
    }
    config.validate()?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
        Command::Config { write } => {
            if write {
                config.save_to_file(&config_path)?;
                println!("Wrote {}", config_path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

async fn run_chat(config: LiveConfig) -> anyhow::Result<()> {
    println!("duplex-live v{}", env!("CARGO_PKG_VERSION"));
    let url = endpoint_url(&config.server)?;

    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(input_tx.clone());

    let ctrl_c_tx = input_tx;
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            if ctrl_c_tx.send(Input::Quit).is_err() {
                break;
            }
        }
    });

    let mut slot = SessionSlot::new();
    let mut ui = ConsoleUi;
    loop {
        slot.ensure_available()?;

        // Devices first, so a missing microphone never opens a connection.
        let Some((microphone, sink, playback_events)) =
            open_or_report(&mut ui, || open_audio(&config))
        else {
            println!("Type /start to retry or /quit to exit.");
            if wait_for_start(&mut input_rx).await {
                continue;
            }
            break;
        };

        let parts = SessionParts {
            transport: Transport::connect(url.as_str()),
            microphone: Box::new(microphone),
            camera: camera_provider(&config),
            sink,
            playback_events,
            ui: Box::new(ConsoleUi),
        };
        let (session, handle) = match Session::start(config.clone(), parts) {
            Ok(started) => started,
            Err(e) => {
                println!("\nCould not start the session: {e}");
                println!("Type /start to retry or /quit to exit.");
                if wait_for_start(&mut input_rx).await {
                    continue;
                }
                break;
            }
        };
        slot.track(&handle);

        println!("\nConnecting to {url}... Type to chat, /camera to switch cameras, /stop to end.\n");

        let run = session.run();
        tokio::pin!(run);
        let mut quit = false;
        let reason = loop {
            tokio::select! {
                reason = &mut run => break reason?,
                input = input_rx.recv() => match input {
                    Some(Input::Text(text)) => handle.send_text(text),
                    Some(Input::Camera) => handle.toggle_camera(),
                    Some(Input::Start) => println!("A session is already running."),
                    Some(Input::Stop) => handle.stop(),
                    Some(Input::Quit) | None => {
                        quit = true;
                        handle.stop();
                    }
                },
            }
        };

        if quit {
            break;
        }
        match reason {
            CloseReason::Error(e) => println!("\nSession failed: {e}"),
            other => println!("\nSession {other}."),
        }
        println!("Type /start to reconnect or /quit to exit.");

        if !wait_for_start(&mut input_rx).await {
            break;
        }
    }

    Ok(())
}

type AudioDevices = (
    CpalCapture,
    CpalPlayback,
    mpsc::UnboundedReceiver<PlaybackEvent>,
);

fn open_audio(config: &LiveConfig) -> duplex_live::Result<AudioDevices> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let microphone = CpalCapture::new(&config.capture)?;
    let sink = CpalPlayback::new(&config.playback, event_tx)?;
    Ok((microphone, sink, event_rx))
}

/// Run `open`, showing the device notice and the cause when it fails.
fn open_or_report<T>(
    ui: &mut dyn UiSink,
    open: impl FnOnce() -> duplex_live::Result<T>,
) -> Option<T> {
    match open() {
        Ok(devices) => Some(devices),
        Err(e) => {
            warn!("device access failed: {e}");
            ui.append(Speaker::System, notices::DEVICE_FAILED);
            println!("{e}");
            None
        }
    }
}

/// Block until the user asks for a new session. Returns `false` on quit.
async fn wait_for_start(input_rx: &mut mpsc::UnboundedReceiver<Input>) -> bool {
    while let Some(input) = input_rx.recv().await {
        match input {
            Input::Start => return true,
            Input::Quit => return false,
            Input::Text(text) if text.is_empty() => {}
            _ => println!("Not connected. Type /start to reconnect or /quit to exit."),
        }
    }
    false
}

fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Input>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(parse_input(&line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(feature = "camera")]
fn camera_provider(config: &LiveConfig) -> Option<Box<dyn CameraProvider>> {
    use duplex_live::video::native::NativeCameraProvider;
    config
        .video
        .enabled
        .then(|| Box::new(NativeCameraProvider) as Box<dyn CameraProvider>)
}

#[cfg(not(feature = "camera"))]
fn camera_provider(config: &LiveConfig) -> Option<Box<dyn CameraProvider>> {
    if config.video.enabled {
        warn!("built without the `camera` feature, running audio-only");
    }
    None
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}
