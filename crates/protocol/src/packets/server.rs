//! Server -> Client packet building.

use super::ServerOpcode;
use crate::{BinaryWriter, Color, Position};

/// Player cell entry in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPlayer {
    pub id: u32,
    /// Controlling session; equals `id` for controllers.
    pub owner: u32,
    pub position: Position,
    pub radius: f32,
    pub mass: f32,
    pub color: Color,
    pub flags: PlayerFlags,
    pub name: String,
}

/// Flags for a snapshot player entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerFlags {
    pub is_split_piece: bool,
    pub is_staked: bool,
}

impl PlayerFlags {
    /// Convert flags to the wire byte.
    pub fn to_byte(self) -> u8 {
        let mut flags = 0u8;
        if self.is_split_piece {
            flags |= 0x01;
        }
        if self.is_staked {
            flags |= 0x02;
        }
        flags
    }
}

/// A coin or hazard entry in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotBody {
    pub id: u32,
    pub position: Position,
    pub radius: f32,
}

/// Leaderboard row: a controller ranked by its group score.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub id: u32,
    pub score: f32,
    pub name: String,
}

/// Stake lock state carried by a StakeStatus packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStatus {
    Locked = 0,
    Unstaked = 1,
    Refunded = 2,
}

/// Build a Snapshot packet (0x10).
///
/// Players and hazards are sent in full; coins are sent as a delta against
/// what the receiving connection already knows. At most 255 leaderboard
/// rows are written.
pub fn build_snapshot(
    tick: u64,
    players: &[SnapshotPlayer],
    coins_added: &[SnapshotBody],
    coins_removed: &[u32],
    hazards: &[SnapshotBody],
    leaderboard: &[LeaderboardEntry],
) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(
        21 + players.len() * 40 + coins_added.len() * 16 + coins_removed.len() * 4 + hazards.len() * 16,
    );
    w.put_u8(ServerOpcode::Snapshot as u8);
    w.put_u64(tick);

    w.put_u32(players.len() as u32);
    for p in players {
        w.put_u32(p.id);
        w.put_u32(p.owner);
        w.put_f32(p.position.x);
        w.put_f32(p.position.y);
        w.put_f32(p.radius);
        w.put_f32(p.mass);
        w.put_u8(p.color.r);
        w.put_u8(p.color.g);
        w.put_u8(p.color.b);
        w.put_u8(p.flags.to_byte());
        w.put_string(&p.name);
    }

    w.put_u32(coins_added.len() as u32);
    for c in coins_added {
        put_body(&mut w, c);
    }

    w.put_u32(coins_removed.len() as u32);
    for &id in coins_removed {
        w.put_u32(id);
    }

    w.put_u32(hazards.len() as u32);
    for h in hazards {
        put_body(&mut w, h);
    }

    let rows = &leaderboard[..leaderboard.len().min(u8::MAX as usize)];
    w.put_u8(rows.len() as u8);
    for row in rows {
        w.put_u32(row.id);
        w.put_f32(row.score);
        w.put_string(&row.name);
    }
    w
}

#[inline]
fn put_body(w: &mut BinaryWriter, body: &SnapshotBody) {
    w.put_u32(body.id);
    w.put_f32(body.position.x);
    w.put_f32(body.position.y);
    w.put_f32(body.radius);
}

/// Build a Joined packet (0x20).
pub fn build_joined(
    session_id: u32,
    position: Position,
    mass: f32,
    world_size: f32,
    playable_radius: f32,
    declared_stake: u64,
    stake_pending: bool,
) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(34);
    w.put_u8(ServerOpcode::Joined as u8);
    w.put_u32(session_id);
    w.put_f32(position.x);
    w.put_f32(position.y);
    w.put_f32(mass);
    w.put_f32(world_size);
    w.put_f32(playable_radius);
    w.put_u64(declared_stake);
    w.put_u8(stake_pending as u8);
    w
}

/// Build an Eliminated packet (0x30).
pub fn build_eliminated(final_score: f32, final_mass: f32, eliminator: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(10 + eliminator.len());
    w.put_u8(ServerOpcode::Eliminated as u8);
    w.put_f32(final_score);
    w.put_f32(final_mass);
    w.put_string(eliminator);
    w
}

/// Build a room-wide StakeTransfer notice (0x31).
pub fn build_stake_transfer(winner: &str, loser: &str, amount: u64) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(11 + winner.len() + loser.len());
    w.put_u8(ServerOpcode::StakeTransfer as u8);
    w.put_string(winner);
    w.put_string(loser);
    w.put_u64(amount);
    w
}

/// Build a StakeCredit packet (0x32) for the winner.
pub fn build_stake_credit(amount: u64, from: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(10 + from.len());
    w.put_u8(ServerOpcode::StakeCredit as u8);
    w.put_u64(amount);
    w.put_string(from);
    w
}

/// Build a StakeDebit packet (0x33) for the loser.
pub fn build_stake_debit(amount: u64, to: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(10 + to.len());
    w.put_u8(ServerOpcode::StakeDebit as u8);
    w.put_u64(amount);
    w.put_string(to);
    w
}

/// Build a StakeStatus packet (0x34).
pub fn build_stake_status(status: StakeStatus, amount: u64) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(10);
    w.put_u8(ServerOpcode::StakeStatus as u8);
    w.put_u8(status as u8);
    w.put_u64(amount);
    w
}

/// Build a Kicked packet (0x40).
pub fn build_kicked(reason: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(2 + reason.len());
    w.put_u8(ServerOpcode::Kicked as u8);
    w.put_string(reason);
    w
}

/// Build a Rejected packet (0x41).
pub fn build_rejected(reason: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(2 + reason.len());
    w.put_u8(ServerOpcode::Rejected as u8);
    w.put_string(reason);
    w
}
