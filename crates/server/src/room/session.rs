//! Player session state.

use crate::entity::SessionId;

/// A player joined to a room.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id; also the id of the player's controller cell.
    pub id: SessionId,
    pub name: String,
    /// Ledger identity, set only for authenticated joins.
    pub user_id: Option<String>,
    /// Stake the player asked to lock on join.
    pub declared_stake: u64,
    /// Whether a reserve for the declared stake is still in flight.
    pub reserve_pending: bool,
    /// Simulation time of the join.
    pub joined_at: f64,
    /// Steering inputs applied.
    pub inputs_applied: u64,
    /// Steering inputs dropped as stale or malformed.
    pub inputs_dropped: u64,
}

impl Session {
    /// Create a new session.
    pub fn new(id: SessionId, name: String, user_id: Option<String>, declared_stake: u64, joined_at: f64) -> Self {
        Self {
            id,
            name,
            user_id,
            declared_stake,
            reserve_pending: false,
            joined_at,
            inputs_applied: 0,
            inputs_dropped: 0,
        }
    }
}
