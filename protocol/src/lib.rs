//! Shared wire model for the gamelink session channel and queue RPC.
//!
//! This crate owns the wire representation spoken between the client engine
//! and the game server: the multiplexed [`Envelope`] carried over the session
//! WebSocket, the full-replacement [`GameSnapshot`] shapes, and the plain
//! JSON request/reply types of the matchmaking queue RPC.
//!
//! Everything here is serde over JSON text frames. Decoding is total: bad
//! input comes back as a [`CodecError`], never a panic.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by [`Envelope::decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text was not valid JSON, or a payload did not match its kind.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame parsed as JSON but carries no `type` tag.
    #[error("frame has no kind tag")]
    MissingKind,
    /// The `type` tag is not one of the known envelope kinds.
    #[error("unknown envelope kind: {0}")]
    UnknownKind(String),
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// One multiplexed message on the session channel.
///
/// Wire shape: `{ "type": "move" | "chat" | "state" | "ping", "data": ... }`.
/// A single ordered channel carries all kinds; the multiplexer routes each
/// envelope to exactly one consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    /// Client → server: a locally-initiated move. Never acknowledged
    /// directly; its effect shows up in a later `state` envelope.
    Move(MovePayload),
    /// Both directions: chat. The server fans chat out to all participants
    /// including the sender, so the client never locally echoes.
    Chat(ChatPayload),
    /// Server → client: full authoritative snapshot, replacing any prior one.
    State(GameSnapshot),
    /// Best-effort keep-alive. Empty payload, no reply required.
    Ping,
}

impl Envelope {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// [`CodecError::Malformed`] for invalid JSON or a payload that does not
    /// match its kind, [`CodecError::MissingKind`] when the `type` tag is
    /// absent, and [`CodecError::UnknownKind`] for a tag outside the known
    /// set — callers treat the last as a protocol violation rather than a
    /// parse failure.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(CodecError::MissingKind);
        };
        match kind {
            "move" | "chat" | "state" | "ping" => Ok(serde_json::from_value(value)?),
            other => Err(CodecError::UnknownKind(other.to_owned())),
        }
    }

    /// Encode into a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serialization of these types cannot fail: string keys throughout.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A move as sent by this client. `playerId` travels alongside the action so
/// the server can attribute the move without inspecting the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub player_id: String,
    #[serde(flatten)]
    pub action: MoveAction,
}

/// What a move does — a cell placement for turn-based grid games, or a
/// steering change for realtime games.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum MoveAction {
    Place { index: u8 },
    Steer { direction: Direction },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub from_player_id: String,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// A complete, server-authoritative description of game state.
///
/// Snapshots are never diffed or merged — each one wholly replaces its
/// predecessor. The two variants cover the two game families: `Grid` for
/// turn-based board games, `Arena` for realtime cell-occupancy games. Both
/// carry a terminal indicator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameSnapshot {
    Grid(GridSnapshot),
    Arena(ArenaSnapshot),
}

/// Turn-based board shape: `{ board, turn, winner, isDraw, players }`.
/// An empty string marks a free cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSnapshot {
    pub board: Vec<String>,
    #[serde(default)]
    pub turn: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub is_draw: bool,
    #[serde(default)]
    pub players: Vec<String>,
}

/// Realtime shape: per-player entities occupying cells, plus the terminal
/// indicator. There is no turn owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaSnapshot {
    pub entities: Vec<ArenaEntity>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaEntity {
    pub id: String,
    #[serde(default)]
    pub cells: Vec<GridPoint>,
    #[serde(default = "default_true")]
    pub alive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

fn default_true() -> bool {
    true
}

/// Terminal standing derived from a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    Winner(String),
    Draw,
    None,
}

impl GameSnapshot {
    /// Terminal standing of this snapshot. A full board with no winner counts
    /// as a draw even when the server omitted the draw flag.
    #[must_use]
    pub fn terminal(&self) -> Terminal {
        match self {
            GameSnapshot::Grid(grid) => {
                if let Some(winner) = &grid.winner {
                    return Terminal::Winner(winner.clone());
                }
                if grid.is_draw {
                    return Terminal::Draw;
                }
                if !grid.board.is_empty() && grid.board.iter().all(|cell| !cell.is_empty()) {
                    return Terminal::Draw;
                }
                Terminal::None
            }
            GameSnapshot::Arena(arena) => {
                if let Some(winner) = &arena.winner {
                    return Terminal::Winner(winner.clone());
                }
                if arena.finished {
                    return Terminal::Draw;
                }
                Terminal::None
            }
        }
    }

    /// Whose turn it is, for turn-based games. Realtime snapshots have none.
    #[must_use]
    pub fn turn_owner(&self) -> Option<&str> {
        match self {
            GameSnapshot::Grid(grid) => grid.turn.as_deref(),
            GameSnapshot::Arena(_) => None,
        }
    }
}

impl GridSnapshot {
    /// Whether `index` addresses a free cell on the board.
    #[must_use]
    pub fn is_cell_free(&self, index: usize) -> bool {
        self.board.get(index).is_some_and(String::is_empty)
    }
}

// =============================================================================
// QUEUE RPC
// =============================================================================

/// Join request body: `{ playerId, gameId }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub player_id: String,
    pub game_id: String,
}

/// Join reply — either the player was queued, or the server paired them
/// immediately and the reply already carries the assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinReply {
    #[serde(rename_all = "camelCase")]
    Matched {
        match_id: String,
        // Some deployments omit the game id; the client already knows it
        // from its own ticket.
        #[serde(default)]
        game_id: String,
        participant_ids: Vec<String>,
    },
    Accepted { accepted: bool },
}

/// Poll reply: `{ found, assignment? }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub found: bool,
    #[serde(default)]
    pub assignment: Option<MatchAssignment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveReply {
    pub removed: bool,
}

/// The server's resolution of a queue ticket into a concrete match.
/// Immutable; participant ids are ordered and unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAssignment {
    pub match_id: String,
    #[serde(default)]
    pub game_id: String,
    pub participant_ids: Vec<String>,
}

// =============================================================================
// IDENTITY & CHAT
// =============================================================================

/// The current player, supplied by the identity collaborator. Immutable for
/// the duration of a session; the engine never looks identity up ambiently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub level: u32,
}

/// One entry in the append-only chat log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEntry {
    pub from_player_id: String,
    pub text: String,
    /// Milliseconds since the Unix epoch, stamped on receipt.
    pub received_at: i64,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
