//! Stake arena game server library.

pub mod anticheat;
pub mod auth;
pub mod collision;
pub mod config;
pub mod entity;
pub mod ledger;
pub mod physics;
pub mod room;
pub mod server;
pub mod sim;
pub mod spatial;
pub mod split;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use room::{RoomHandle, RoomRegistry, TargetedMessage, TargetedMessageType};
pub use server::run;
pub use sim::{Simulation, WorldSnapshot};
