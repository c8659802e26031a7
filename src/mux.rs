//! Message multiplexer — all envelope kinds over one ordered channel.
//!
//! Outbound, the multiplexer wraps moves and chat into [`Envelope`]s and
//! hands them to the session; inbound, it decodes each text frame and routes
//! it to exactly one consumer: snapshots to the reconciler, chat to the log,
//! pings nowhere. Interleaving order is preserved because everything rides
//! the single session channel.
//!
//! A malformed inbound frame is logged and dropped; it never tears down the
//! connection or reaches a consumer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use protocol::{ChatEntry, ChatPayload, CodecError, Envelope, MoveAction, MovePayload, now_ms};

use crate::EngineEvent;
use crate::chat::ChatLog;
use crate::reconcile::Reconciler;
use crate::transport::SessionHandle;

pub struct Multiplexer {
    session: SessionHandle,
    player_id: String,
    reconciler: Arc<Reconciler>,
    chat: Arc<ChatLog>,
    events: mpsc::Sender<EngineEvent>,
}

impl Multiplexer {
    #[must_use]
    pub fn new(
        session: SessionHandle,
        player_id: impl Into<String>,
        reconciler: Arc<Reconciler>,
        chat: Arc<ChatLog>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            session,
            player_id: player_id.into(),
            reconciler,
            chat,
            events,
        }
    }

    /// Send a move. Fire-and-forget: while the session is not open the move
    /// is dropped, never buffered — the next snapshot tells the truth anyway.
    pub fn send_move(&self, action: MoveAction) {
        let envelope = Envelope::Move(MovePayload {
            player_id: self.player_id.clone(),
            action,
        });
        if self.session.send(envelope).is_err() {
            debug!(player_id = %self.player_id, "move dropped; session not open");
        }
    }

    /// Send a chat message. Whitespace is trimmed; an empty result is
    /// dropped without touching the wire. No local echo — the entry shows
    /// up when the server fans it back.
    pub fn send_chat(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let envelope = Envelope::Chat(ChatPayload {
            from_player_id: self.player_id.clone(),
            text: text.to_owned(),
            timestamp: now_ms(),
        });
        if self.session.send(envelope).is_err() {
            debug!(player_id = %self.player_id, "chat dropped; session not open");
        }
    }

    /// Consume inbound frames until the transport closes the channel.
    pub async fn run(&self, mut inbound: mpsc::Receiver<String>) {
        while let Some(text) = inbound.recv().await {
            self.dispatch(&text).await;
        }
        debug!(player_id = %self.player_id, "inbound channel closed");
    }

    async fn dispatch(&self, text: &str) {
        match Envelope::decode(text) {
            Ok(Envelope::State(snapshot)) => {
                self.reconciler.apply(snapshot.clone());
                let _ = self.events.send(EngineEvent::Snapshot(snapshot)).await;
            }
            Ok(Envelope::Chat(payload)) => {
                let entry = ChatEntry {
                    from_player_id: payload.from_player_id,
                    text: payload.text,
                    received_at: now_ms(),
                };
                self.chat.append(entry.clone());
                let _ = self.events.send(EngineEvent::Chat(entry)).await;
            }
            Ok(Envelope::Ping) => debug!("ping received"),
            // The server never originates moves.
            Ok(Envelope::Move(_)) => {
                warn!(player_id = %self.player_id, "protocol violation: inbound move envelope");
            }
            Err(CodecError::UnknownKind(kind)) => {
                warn!(%kind, "protocol violation: unknown envelope kind");
            }
            Err(e) => warn!(error = %e, "malformed frame dropped"),
        }
    }
}

#[cfg(test)]
#[path = "mux_test.rs"]
mod tests;
