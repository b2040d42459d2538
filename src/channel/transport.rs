//! WebSocket transport for the duplex channel.
//!
//! The socket lives in a background task. The session talks to it through
//! a [`TransportHandle`] (outbound frames, close requests) and receives
//! [`TransportEvent`]s in return. The task always ends by emitting exactly
//! one [`TransportEvent::Closed`].

use crate::error::{LiveError, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Requests from the session to the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send a JSON text frame.
    Send(String),
    /// Start the closing handshake.
    Close,
}

/// Notifications from the socket task to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The channel failed. A `Closed` event follows.
    Error(String),
    /// The socket is gone.
    Closed,
}

/// Sending half held by the session.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl TransportHandle {
    /// Queue a text frame. Returns `false` if the socket task is gone.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(TransportCommand::Send(text)).is_ok()
    }

    /// Ask the socket task to close the connection.
    pub fn close(&self) {
        let _ = self.tx.send(TransportCommand::Close);
    }
}

/// Both ends of a transport as seen by the session.
#[derive(Debug)]
pub struct Transport {
    /// Outbound commands.
    pub handle: TransportHandle,
    /// Inbound events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The far side of an in-memory transport.
#[derive(Debug)]
pub struct TransportPeer {
    /// Commands the session issued.
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    /// Inject events into the session.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport {
    /// Connect to `url` over WebSocket in a background task.
    pub fn connect(url: impl Into<String>) -> Self {
        let (transport, peer) = Self::in_memory();
        let url = url.into();
        tokio::spawn(async move {
            socket_task(url, peer).await;
        });
        transport
    }

    /// A transport whose far side is driven directly, without a socket.
    pub fn in_memory() -> (Self, TransportPeer) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                handle: TransportHandle { tx: cmd_tx },
                events: event_rx,
            },
            TransportPeer {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }
}

/// Run one connection to completion and report `Closed`.
async fn socket_task(url: String, mut peer: TransportPeer) {
    if let Err(e) = run_socket(&url, &mut peer).await {
        warn!("WebSocket connection failed: {e}");
        let _ = peer.events.send(TransportEvent::Error(e.to_string()));
    }
    let _ = peer.events.send(TransportEvent::Closed);
}

/// Returns `Ok(())` on an orderly close, `Err` on connection failure or
/// unexpected disconnect.
async fn run_socket(url: &str, peer: &mut TransportPeer) -> Result<()> {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    info!("connecting to {url}");
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| LiveError::Channel(format!("connect: {e}")))?;
    let (mut write, mut read) = ws_stream.split();

    if peer.events.send(TransportEvent::Opened).is_err() {
        // Session already gone.
        let _ = write.send(Message::Close(None)).await;
        return Ok(());
    }

    let mut closing = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if closing {
                            continue;
                        }
                        if peer.events.send(TransportEvent::Message(text)).is_err() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("close frame received: {frame:?}");
                        return Ok(());
                    }
                    None => {
                        return if closing {
                            Ok(())
                        } else {
                            Err(LiveError::Channel("connection closed by server".into()))
                        };
                    }
                    Some(Err(e)) => {
                        return if closing {
                            Ok(())
                        } else {
                            Err(LiveError::Channel(format!("read error: {e}")))
                        };
                    }
                    _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                }
            }
            cmd = peer.commands.recv(), if !closing => {
                match cmd {
                    Some(TransportCommand::Send(json)) => {
                        if let Err(e) = write.send(Message::Text(json)).await {
                            return Err(LiveError::Channel(format!("send error: {e}")));
                        }
                    }
                    Some(TransportCommand::Close) | None => {
                        closing = true;
                        if let Err(e) = write.send(Message::Close(None)).await {
                            debug!("close frame not sent: {e}");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
