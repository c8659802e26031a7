//! State reconciliation — last-write-wins snapshots and local move gating.
//!
//! The server is the only authority: every inbound snapshot wholly replaces
//! the previous one, with no diffing, merging, or rollback. Out-of-date
//! overwrites are invisible by construction because the channel delivers
//! snapshots in server order.
//!
//! Local moves are validated against the held snapshot before they are sent.
//! Validation is advisory — it keeps obviously-invalid traffic off the wire
//! and gives the UI an immediate rejection reason, but the server re-checks
//! everything.

use std::sync::Mutex;

use tracing::debug;

use protocol::{GameSnapshot, MoveAction, Terminal};

/// Why a locally-initiated move was not sent. Ordered checks: game over
/// before turn, turn before bounds, bounds before occupancy.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejection {
    #[error("no snapshot received yet")]
    NoSnapshot,
    #[error("the game is over")]
    GameOver,
    #[error("player has been eliminated")]
    Eliminated,
    #[error("not this player's turn")]
    NotYourTurn,
    #[error("cell index is out of bounds")]
    OutOfBounds,
    #[error("cell is already occupied")]
    CellOccupied,
    #[error("action does not apply to this game")]
    ActionMismatch,
}

/// Holds the latest authoritative snapshot for one player's session.
pub struct Reconciler {
    player_id: String,
    slot: Mutex<Option<GameSnapshot>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            slot: Mutex::new(None),
        }
    }

    /// Replace the held snapshot wholesale.
    pub fn apply(&self, snapshot: GameSnapshot) {
        debug!(player_id = %self.player_id, "snapshot applied");
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot);
    }

    /// The latest snapshot, if any has arrived.
    #[must_use]
    pub fn snapshot(&self) -> Option<GameSnapshot> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Whether the held snapshot says it is this player's turn. Realtime
    /// games have no turn owner, so this is `false` for them.
    #[must_use]
    pub fn is_my_turn(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| s.turn_owner() == Some(self.player_id.as_str()))
    }

    /// Terminal standing of the held snapshot. `Terminal::None` both before
    /// the first snapshot and while the game is still running.
    #[must_use]
    pub fn outcome(&self) -> Terminal {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map_or(Terminal::None, GameSnapshot::terminal)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome() != Terminal::None
    }

    /// Gate a locally-initiated move against the held snapshot.
    ///
    /// # Errors
    ///
    /// The first failing check, in order: [`MoveRejection::NoSnapshot`],
    /// [`MoveRejection::GameOver`], then per-game rules — turn ownership,
    /// board bounds, and cell occupancy for placements; liveness for
    /// steering.
    pub fn validate(&self, action: &MoveAction) -> Result<(), MoveRejection> {
        let slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(snapshot) = slot.as_ref() else {
            return Err(MoveRejection::NoSnapshot);
        };
        if snapshot.terminal() != Terminal::None {
            return Err(MoveRejection::GameOver);
        }

        match (action, snapshot) {
            (MoveAction::Place { index }, GameSnapshot::Grid(grid)) => {
                if grid.turn.as_deref() != Some(self.player_id.as_str()) {
                    return Err(MoveRejection::NotYourTurn);
                }
                let index = usize::from(*index);
                if index >= grid.board.len() {
                    return Err(MoveRejection::OutOfBounds);
                }
                if !grid.is_cell_free(index) {
                    return Err(MoveRejection::CellOccupied);
                }
                Ok(())
            }
            (MoveAction::Steer { .. }, GameSnapshot::Arena(arena)) => {
                let eliminated = arena
                    .entities
                    .iter()
                    .any(|e| e.id == self.player_id && !e.alive);
                if eliminated {
                    return Err(MoveRejection::Eliminated);
                }
                Ok(())
            }
            _ => Err(MoveRejection::ActionMismatch),
        }
    }
}

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod tests;
