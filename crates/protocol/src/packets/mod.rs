//! Packet definitions for the arena protocol.
//!
//! This module contains both client->server and server->client packet types.

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join a room with name, identity and declared stake.
    Join = 0x00,
    /// Sequenced steering input.
    Input = 0x10,
    /// Split toward a world-space target.
    Split = 0x11,
    /// Voluntary leave.
    Leave = 0x12,
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Periodic world snapshot.
    Snapshot = 0x10,
    /// Join accepted, carries the spawned controller.
    Joined = 0x20,
    /// You were eliminated.
    Eliminated = 0x30,
    /// Room-wide stake transfer notice.
    StakeTransfer = 0x31,
    /// Stake credited to you.
    StakeCredit = 0x32,
    /// Stake debited from you.
    StakeDebit = 0x33,
    /// Your stake lock state changed.
    StakeStatus = 0x34,
    /// Removed by the anti-cheat gate.
    Kicked = 0x40,
    /// Join rejected.
    Rejected = 0x41,
}
