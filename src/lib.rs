//! Gamelink — client-side matchmaking and live-session synchronization.
//!
//! ARCHITECTURE
//! ============
//! Four components, leaves first:
//! - [`queue::QueueClient`] resolves a queue ticket into a
//!   [`protocol::MatchAssignment`], by polling or push.
//! - [`transport::SessionTransport`] owns one duplex connection per match:
//!   connect, heartbeat, reconnect-with-backoff, explicit close.
//! - [`mux::Multiplexer`] serializes outbound envelopes and routes each
//!   inbound envelope to exactly one consumer.
//! - [`reconcile::Reconciler`] holds the last authoritative snapshot and
//!   gates locally-initiated moves against it.
//!
//! [`session::LiveSession`] wires the last three together for one match.
//! The presentation layer observes everything through one [`EngineEvent`]
//! channel; no engine failure ever propagates as a panic or an error to it.

pub use protocol;

pub mod chat;
pub mod config;
pub mod mux;
pub mod queue;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use config::EngineConfig;
pub use mux::Multiplexer;
pub use queue::{DiscoveryMode, HttpQueueApi, QueueApi, QueueClient, QueueError, QueueTicket};
pub use reconcile::{MoveRejection, Reconciler};
pub use session::LiveSession;
pub use transport::{
    Channel, ConnectionState, Connector, SendError, SessionHandle, SessionTransport,
    TransportError, WsConnector,
};

/// Mint a guest identity with a fresh unique id, for hosts that have no
/// identity provider of their own.
#[must_use]
pub fn guest_player(display_name: impl Into<String>) -> protocol::Player {
    protocol::Player {
        id: uuid::Uuid::new_v4().to_string(),
        display_name: display_name.into(),
        level: 0,
    }
}

/// The outward collaborator interface: everything the presentation layer
/// can observe from the engine arrives as one of these.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A queue ticket resolved into a match. Emitted at most once per ticket.
    MatchFound(protocol::MatchAssignment),
    /// A reconciled authoritative snapshot, already applied.
    Snapshot(protocol::GameSnapshot),
    /// A chat entry, already appended to the log in server order.
    Chat(protocol::ChatEntry),
    /// The session transport changed state.
    ConnectionChanged(ConnectionState),
}
