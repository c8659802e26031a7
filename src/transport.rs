//! Session transport — one duplex connection per active match.
//!
//! DESIGN
//! ======
//! A session is a single driver task (one logical actor): every state
//! transition, timer tick, and inbound frame for one match is serialized
//! through its `select!` loop. Callers hold a [`SessionHandle`], which
//! rejects sends outside `Open` instead of buffering them, and observe the
//! state machine through a `watch` channel.
//!
//! LIFECYCLE
//! =========
//! `Idle → Connecting → Open → Closing → Closed`, with `Reconnecting`
//! entered whenever the connection is lost without the caller asking:
//! connect failure, heartbeat send failure, or the peer ending the stream.
//! Reconnects retry indefinitely with a doubling, capped backoff; a caller
//! `close()` wins every race and tears down all timers with the task.
//!
//! The transport moves text frames, not envelopes — parsing inbound data is
//! the multiplexer's job, so malformed input can never kill the connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use protocol::Envelope;

use crate::config::EngineConfig;

/// Connection state of one session, observable through
/// [`SessionHandle::watch_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The session is not `Open`. The envelope was dropped, not buffered;
    /// the caller decides whether the intent still holds later.
    #[error("session is not open")]
    NotConnected,
}

/// A connected channel pair: text frames out, text frames in. The inbound
/// receiver closing means the peer (or the socket) went away.
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Seam between the session state machine and the actual socket, so the
/// machine is testable without a live connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection scoped to one match/player pair. Both
    /// identifiers travel in the establishment parameters so the server can
    /// route before any payload arrives.
    async fn connect(&self, match_id: &str, player_id: &str) -> Result<Channel, TransportError>;
}

// =============================================================================
// PRODUCTION CONNECTOR
// =============================================================================

/// Production [`Connector`] over tokio-tungstenite.
pub struct WsConnector {
    ws_base: String,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self { ws_base: ws_base.into() }
    }
}

/// Session channel URL for a match/player pair.
fn session_url(ws_base: &str, match_id: &str, player_id: &str) -> String {
    format!("{}/ws/{match_id}/{player_id}", ws_base.trim_end_matches('/'))
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, match_id: &str, player_id: &str) -> Result<Channel, TransportError> {
        let url = session_url(&self.ws_base, match_id, player_id);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<String>(256);

        // Writer pump: ends (dropping the socket's write half) when either
        // the driver drops the outbound sender or a write fails.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader pump: ends on close or error, which closes the inbound
        // channel and lets the driver observe the loss.
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Channel { outbound: out_tx, inbound: in_rx })
    }
}

// =============================================================================
// HANDLE
// =============================================================================

enum Command {
    Send(Envelope),
    Close,
}

/// Caller-facing handle to one session's driver task.
#[derive(Clone)]
pub struct SessionHandle {
    match_id: String,
    player_id: String,
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    last_heartbeat: Arc<Mutex<Option<Instant>>>,
}

impl SessionHandle {
    #[must_use]
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Observe state transitions. The channel closes when the session is
    /// fully torn down.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// When the last heartbeat ping went out, if any.
    #[must_use]
    pub fn last_heartbeat_at(&self) -> Option<Instant> {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Hand an envelope to the driver for sending.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] in any state but `Open`. Envelopes are
    /// never buffered across states.
    pub fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotConnected);
        }
        self.cmd_tx
            .try_send(Command::Send(envelope))
            .map_err(|_| SendError::NotConnected)
    }

    /// Request teardown. Cancels any pending heartbeat or reconnect timer
    /// with the driver task; the terminal `Closed` state follows. Idempotent.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

#[derive(Clone, Copy)]
struct Timings {
    heartbeat: Duration,
    reconnect_initial: Duration,
    reconnect_max: Duration,
}

/// Factory for session driver tasks. One transport can open independent
/// sessions; they share nothing but the connector.
pub struct SessionTransport {
    timings: Timings,
    connector: Arc<dyn Connector>,
}

impl SessionTransport {
    #[must_use]
    pub fn new(config: &EngineConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            timings: Timings {
                heartbeat: config.heartbeat_interval,
                reconnect_initial: config.reconnect_initial,
                reconnect_max: config.reconnect_max,
            },
            connector,
        }
    }

    /// Spawn the driver for one match/player pair. Inbound text frames are
    /// forwarded to `inbound_tx` in wire order.
    #[must_use]
    pub fn open(
        &self,
        match_id: impl Into<String>,
        player_id: impl Into<String>,
        inbound_tx: mpsc::Sender<String>,
    ) -> SessionHandle {
        let match_id = match_id.into();
        let player_id = player_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let last_heartbeat = Arc::new(Mutex::new(None));

        tokio::spawn(drive(
            self.timings,
            Arc::clone(&self.connector),
            match_id.clone(),
            player_id.clone(),
            cmd_rx,
            state_tx,
            inbound_tx,
            Arc::clone(&last_heartbeat),
        ));

        SessionHandle { match_id, player_id, cmd_tx, state_rx, last_heartbeat }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    debug!(?state, "session state");
    let _ = state_tx.send(state);
}

/// Resolves when the caller requests close (or drops every handle).
/// Stray `Send` commands racing a state change are discarded, which is the
/// reject-not-buffer contract.
async fn next_close(cmd_rx: &mut mpsc::Receiver<Command>) {
    loop {
        match cmd_rx.recv().await {
            Some(Command::Close) | None => return,
            Some(Command::Send(_)) => {}
        }
    }
}

/// Sleep for `delay`, unless the caller closes first. Returns `true` on close.
async fn sleep_or_close(cmd_rx: &mut mpsc::Receiver<Command>, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        () = next_close(cmd_rx) => true,
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    timings: Timings,
    connector: Arc<dyn Connector>,
    match_id: String,
    player_id: String,
    mut cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::Sender<String>,
    last_heartbeat: Arc<Mutex<Option<Instant>>>,
) {
    let mut backoff = timings.reconnect_initial;

    'session: loop {
        set_state(&state_tx, ConnectionState::Connecting);

        let connected = tokio::select! {
            result = connector.connect(&match_id, &player_id) => result,
            () = next_close(&mut cmd_rx) => break 'session,
        };

        let mut channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                warn!(%match_id, %player_id, error = %e, "session connect failed");
                set_state(&state_tx, ConnectionState::Reconnecting);
                if sleep_or_close(&mut cmd_rx, backoff).await {
                    break 'session;
                }
                backoff = backoff.saturating_mul(2).min(timings.reconnect_max);
                continue 'session;
            }
        };

        info!(%match_id, %player_id, "session open");
        set_state(&state_tx, ConnectionState::Open);
        backoff = timings.reconnect_initial;

        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + timings.heartbeat, timings.heartbeat);

        // `true` means the caller asked for the close.
        let requested = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(envelope)) => {
                        if channel.outbound.send(envelope.encode()).await.is_err() {
                            break false;
                        }
                    }
                    Some(Command::Close) | None => {
                        set_state(&state_tx, ConnectionState::Closing);
                        break true;
                    }
                },
                inbound = channel.inbound.recv() => match inbound {
                    Some(text) => {
                        // Multiplexer gone means the owning session is being
                        // torn down; treat like a caller close.
                        if inbound_tx.send(text).await.is_err() {
                            break true;
                        }
                    }
                    None => break false,
                },
                _ = heartbeat.tick() => {
                    if channel.outbound.send(Envelope::Ping.encode()).await.is_err() {
                        break false;
                    }
                    *last_heartbeat
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) =
                        Some(Instant::now());
                    debug!(%match_id, "heartbeat sent");
                }
            }
        };

        if requested {
            break 'session;
        }

        warn!(%match_id, %player_id, "session lost; reconnecting");
        set_state(&state_tx, ConnectionState::Reconnecting);
        if sleep_or_close(&mut cmd_rx, backoff).await {
            break 'session;
        }
        backoff = backoff.saturating_mul(2).min(timings.reconnect_max);
    }

    info!(%match_id, %player_id, "session closed");
    set_state(&state_tx, ConnectionState::Closed);
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
