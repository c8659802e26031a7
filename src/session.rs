//! Live session — one match, fully wired.
//!
//! `LiveSession` assembles the per-match pipeline: a transport driver for
//! the connection, a multiplexer task for routing, a reconciler for
//! authoritative state, and a chat log. The presentation layer calls the
//! synchronous surface (`play`, `say`, `snapshot`, `chat_log`) and watches
//! the shared event channel; nothing here ever panics back at it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use protocol::{ChatEntry, GameSnapshot, MatchAssignment, MoveAction, Player};

use crate::EngineEvent;
use crate::chat::ChatLog;
use crate::config::EngineConfig;
use crate::mux::Multiplexer;
use crate::reconcile::{MoveRejection, Reconciler};
use crate::transport::{ConnectionState, Connector, SessionHandle, SessionTransport, WsConnector};

pub struct LiveSession {
    handle: SessionHandle,
    mux: Arc<Multiplexer>,
    reconciler: Arc<Reconciler>,
    chat: Arc<ChatLog>,
    assignment: MatchAssignment,
}

impl LiveSession {
    /// Connect to a match over the production WebSocket endpoint.
    #[must_use]
    pub fn connect(
        config: &EngineConfig,
        player: &Player,
        assignment: MatchAssignment,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
        Self::start(config, connector, player, assignment, events)
    }

    /// Assemble the session pipeline over any connector.
    #[must_use]
    pub fn start(
        config: &EngineConfig,
        connector: Arc<dyn Connector>,
        player: &Player,
        assignment: MatchAssignment,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let transport = SessionTransport::new(config, connector);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let handle = transport.open(assignment.match_id.clone(), player.id.clone(), inbound_tx);

        let reconciler = Arc::new(Reconciler::new(player.id.clone()));
        let chat = Arc::new(ChatLog::new());
        let mux = Arc::new(Multiplexer::new(
            handle.clone(),
            player.id.clone(),
            Arc::clone(&reconciler),
            Arc::clone(&chat),
            events.clone(),
        ));

        {
            let mux = Arc::clone(&mux);
            tokio::spawn(async move { mux.run(inbound_rx).await });
        }
        tokio::spawn(forward_connection_changes(handle.watch_state(), events));

        Self { handle, mux, reconciler, chat, assignment }
    }

    /// Validate a move against the latest snapshot and send it.
    ///
    /// # Errors
    ///
    /// The [`MoveRejection`] explaining why the move was not sent. A
    /// rejection is local and advisory; it leaves the session untouched.
    pub fn play(&self, action: MoveAction) -> Result<(), MoveRejection> {
        self.reconciler.validate(&action)?;
        self.mux.send_move(action);
        Ok(())
    }

    /// Send a chat message. The entry appears in [`Self::chat_log`] when the
    /// server fans it back, not before.
    pub fn say(&self, text: &str) {
        self.mux.send_chat(text);
    }

    /// Latest authoritative snapshot, if one has arrived.
    #[must_use]
    pub fn snapshot(&self) -> Option<GameSnapshot> {
        self.reconciler.snapshot()
    }

    /// The chat log so far, in receipt order.
    #[must_use]
    pub fn chat_log(&self) -> Vec<ChatEntry> {
        self.chat.entries()
    }

    /// Direct access to the reconciler for derived facts (`is_my_turn`,
    /// `outcome`, `is_finished`).
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.handle.state()
    }

    #[must_use]
    pub fn assignment(&self) -> &MatchAssignment {
        &self.assignment
    }

    /// Tear the session down. Terminal and idempotent; observers see a final
    /// `ConnectionChanged(Closed)` event.
    pub async fn close(&self) {
        self.handle.close().await;
    }
}

/// Forward transport state transitions onto the event channel until the
/// terminal state. Intermediate states may coalesce under load; the terminal
/// `Closed` never does.
async fn forward_connection_changes(
    mut state_rx: watch::Receiver<ConnectionState>,
    events: mpsc::Sender<EngineEvent>,
) {
    loop {
        let state = *state_rx.borrow_and_update();
        if events
            .send(EngineEvent::ConnectionChanged(state))
            .await
            .is_err()
        {
            return;
        }
        if state == ConnectionState::Closed {
            return;
        }
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
