//! Matchmaking queue client.
//!
//! DESIGN
//! ======
//! Joining the queue produces a [`QueueTicket`] and starts one discovery
//! task that resolves it into a [`protocol::MatchAssignment`] — by polling
//! the status RPC at a fixed interval, or by listening on a push channel
//! when the host environment can deliver one. Either way the resolution is
//! emitted exactly once as [`EngineEvent::MatchFound`], and a `leave` that
//! lands first guarantees no stale emission afterwards.
//!
//! A client tracks at most one live ticket. The RPC surface sits behind the
//! [`QueueApi`] trait so matchmaking logic is testable without a server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use protocol::{JoinReply, JoinRequest, LeaveReply, MatchAssignment, Player, StatusReply};

use crate::EngineEvent;
use crate::config::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// This client already holds an unresolved ticket.
    #[error("player is already queued")]
    AlreadyQueued,
    /// No unresolved ticket exists for the player.
    #[error("player is not queued")]
    NotQueued,
    /// The queue RPC failed outright (transport or server error).
    #[error("queue rpc failed: {0}")]
    Network(String),
}

/// Proof of a queue join. Resolution arrives as an event, not through the
/// ticket itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueTicket {
    pub player_id: String,
    pub game_id: String,
}

/// How a ticket gets resolved: fixed-interval status polling, or an
/// externally-fed push channel when the host platform has one.
pub enum DiscoveryMode {
    Poll,
    Push(mpsc::Receiver<MatchAssignment>),
}

// =============================================================================
// RPC SURFACE
// =============================================================================

/// The three queue operations, as the server exposes them.
#[async_trait]
pub trait QueueApi: Send + Sync + 'static {
    async fn join(&self, player: &Player, game_id: &str) -> Result<JoinReply, QueueError>;
    async fn status(&self, player_id: &str) -> Result<StatusReply, QueueError>;
    async fn leave(&self, player_id: &str) -> Result<LeaveReply, QueueError>;
}

/// Production [`QueueApi`] over the server's JSON endpoints.
pub struct HttpQueueApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpQueueApi {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

fn rpc_err(e: reqwest::Error) -> QueueError {
    QueueError::Network(e.to_string())
}

#[async_trait]
impl QueueApi for HttpQueueApi {
    async fn join(&self, player: &Player, game_id: &str) -> Result<JoinReply, QueueError> {
        let body = JoinRequest {
            player_id: player.id.clone(),
            game_id: game_id.to_owned(),
        };
        let response = self
            .http
            .post(self.url("/api/queue/join"))
            .json(&body)
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?;
        response.json().await.map_err(rpc_err)
    }

    async fn status(&self, player_id: &str) -> Result<StatusReply, QueueError> {
        let response = self
            .http
            .get(self.url(&format!("/api/queue/status/{player_id}")))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?;
        response.json().await.map_err(rpc_err)
    }

    async fn leave(&self, player_id: &str) -> Result<LeaveReply, QueueError> {
        let response = self
            .http
            .post(self.url("/api/queue/leave"))
            .json(&serde_json::json!({ "playerId": player_id }))
            .send()
            .await
            .map_err(rpc_err)?
            .error_for_status()
            .map_err(rpc_err)?;
        response.json().await.map_err(rpc_err)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

struct Discovery {
    ticket: QueueTicket,
    /// Set by the discovery task just before it emits `MatchFound`.
    resolved: Arc<AtomicBool>,
    cancel: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Client for the matchmaking queue. Holds at most one live ticket.
pub struct QueueClient {
    api: Arc<dyn QueueApi>,
    poll_interval: Duration,
    events: mpsc::Sender<EngineEvent>,
    inner: tokio::sync::Mutex<Option<Discovery>>,
}

impl QueueClient {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        api: Arc<dyn QueueApi>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            api,
            poll_interval: config.poll_interval,
            events,
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Construct over the production HTTP endpoints from `config.base_url`.
    #[must_use]
    pub fn over_http(config: &EngineConfig, events: mpsc::Sender<EngineEvent>) -> Self {
        Self::new(config, Arc::new(HttpQueueApi::new(config.base_url.clone())), events)
    }

    /// Join the matchmaking queue and start resolving the ticket.
    ///
    /// When the server pairs the player in the join reply itself, the
    /// `MatchFound` event is emitted before this returns and the ticket
    /// comes back already resolved.
    ///
    /// # Errors
    ///
    /// [`QueueError::AlreadyQueued`] while an unresolved ticket exists, and
    /// [`QueueError::Network`] when the join RPC fails or is refused.
    pub async fn join_queue(
        &self,
        player: &Player,
        game_id: &str,
        mode: DiscoveryMode,
    ) -> Result<QueueTicket, QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(discovery) = inner.as_ref() {
            if discovery.resolved.load(Ordering::SeqCst) {
                *inner = None;
            } else {
                return Err(QueueError::AlreadyQueued);
            }
        }

        let reply = self.api.join(player, game_id).await?;
        let ticket = QueueTicket {
            player_id: player.id.clone(),
            game_id: game_id.to_owned(),
        };

        match reply {
            JoinReply::Matched { match_id, game_id, participant_ids } => {
                // Paired on join: the ticket resolves before it is stored.
                info!(%match_id, player_id = %player.id, "matched on join");
                let assignment = MatchAssignment { match_id, game_id, participant_ids };
                let _ = self.events.send(EngineEvent::MatchFound(assignment)).await;
                Ok(ticket)
            }
            JoinReply::Accepted { accepted: false } => {
                Err(QueueError::Network("join was not accepted".to_owned()))
            }
            JoinReply::Accepted { accepted: true } => {
                info!(player_id = %player.id, %game_id, "queued");
                let resolved = Arc::new(AtomicBool::new(false));
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let task = match mode {
                    DiscoveryMode::Poll => tokio::spawn(poll_loop(
                        Arc::clone(&self.api),
                        player.id.clone(),
                        self.poll_interval,
                        self.events.clone(),
                        Arc::clone(&resolved),
                        cancel_rx,
                    )),
                    DiscoveryMode::Push(assignments) => tokio::spawn(push_loop(
                        assignments,
                        self.events.clone(),
                        Arc::clone(&resolved),
                        cancel_rx,
                    )),
                };
                *inner = Some(Discovery { ticket: ticket.clone(), resolved, cancel: cancel_tx, task });
                Ok(ticket)
            }
        }
    }

    /// Leave the queue: stop discovery first, then withdraw server-side, so
    /// no `MatchFound` can be emitted after this returns.
    ///
    /// # Errors
    ///
    /// [`QueueError::NotQueued`] when no unresolved ticket exists for
    /// `player_id` (including a ticket that already resolved), and
    /// [`QueueError::Network`] when the leave RPC fails.
    pub async fn leave_queue(&self, player_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(discovery) = inner.take() else {
            return Err(QueueError::NotQueued);
        };
        if discovery.ticket.player_id != player_id {
            *inner = Some(discovery);
            return Err(QueueError::NotQueued);
        }

        let Discovery { resolved, cancel, task, .. } = discovery;
        let _ = cancel.send(());
        let _ = task.await;
        // The task may have resolved the ticket before the cancel landed.
        if resolved.load(Ordering::SeqCst) {
            return Err(QueueError::NotQueued);
        }

        let reply = self.api.leave(player_id).await?;
        if reply.removed {
            info!(%player_id, "left queue");
            Ok(())
        } else {
            Err(QueueError::NotQueued)
        }
    }

    /// The unresolved ticket currently held, if any.
    pub async fn queued_ticket(&self) -> Option<QueueTicket> {
        let inner = self.inner.lock().await;
        inner
            .as_ref()
            .filter(|d| !d.resolved.load(Ordering::SeqCst))
            .map(|d| d.ticket.clone())
    }
}

// =============================================================================
// DISCOVERY TASKS
// =============================================================================

async fn poll_loop(
    api: Arc<dyn QueueApi>,
    player_id: String,
    interval: Duration,
    events: mpsc::Sender<EngineEvent>,
    resolved: Arc<AtomicBool>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = &mut cancel_rx => return,
            _ = ticker.tick() => {}
        }

        match api.status(&player_id).await {
            Ok(StatusReply { found: true, assignment: Some(assignment) }) => {
                info!(%player_id, match_id = %assignment.match_id, "match found");
                emit_resolution(&events, assignment, &resolved, &mut cancel_rx).await;
                return;
            }
            Ok(StatusReply { found: true, assignment: None }) => {
                warn!(%player_id, "status reported found without an assignment");
            }
            Ok(_) => debug!(%player_id, "still waiting"),
            // Transient by policy: the ticket survives poll failures.
            Err(e) => warn!(%player_id, error = %e, "queue poll failed"),
        }
    }
}

/// Emit the resolution, racing it against cancellation so a `leave` can
/// never stall behind a full event channel. The ticket counts as resolved
/// only once the event is actually delivered.
async fn emit_resolution(
    events: &mpsc::Sender<EngineEvent>,
    assignment: MatchAssignment,
    resolved: &AtomicBool,
    cancel_rx: &mut oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = cancel_rx => {}
        sent = events.send(EngineEvent::MatchFound(assignment)) => {
            if sent.is_ok() {
                resolved.store(true, Ordering::SeqCst);
            }
        }
    }
}

async fn push_loop(
    mut assignments: mpsc::Receiver<MatchAssignment>,
    events: mpsc::Sender<EngineEvent>,
    resolved: Arc<AtomicBool>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let assignment = tokio::select! {
        _ = &mut cancel_rx => return,
        pushed = assignments.recv() => match pushed {
            Some(assignment) => assignment,
            None => return,
        },
    };
    info!(match_id = %assignment.match_id, "match pushed");
    emit_resolution(&events, assignment, &resolved, &mut cancel_rx).await;
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
