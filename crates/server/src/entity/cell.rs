//! Player cell.

use super::{Body, radius_for_mass};
use glam::Vec2;
use protocol::Color;

/// Unique id of a cell within a world.
pub type CellId = u32;

/// Id of a connected session. A controller cell's id equals its session id.
pub type SessionId = u32;

/// A cell controlled by a player: either the controller or a split piece.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: CellId,
    /// Controlling session. Equals `id` for the controller.
    pub owner: SessionId,
    /// Ledger identity of the controlling player, if authenticated.
    pub user_id: Option<String>,
    pub name: String,
    pub color: Color,
    pub position: Vec2,
    /// Player-steered velocity.
    pub velocity: Vec2,
    /// Ejection and merge-attraction forces, decaying independently.
    pub momentum: Vec2,
    mass: f32,
    radius: f32,
    pub score: f32,
    pub alive: bool,
    /// Steering direction from the latest accepted input (controller only).
    pub heading: Vec2,
    /// Last applied input sequence number (controller only).
    pub last_input_seq: u32,
    pub is_split_piece: bool,
    /// Simulation time before which this cell may not merge.
    pub no_merge_until: f64,
    pub last_split_time: f64,
    /// Simulation time before which hazards do not damage this cell.
    pub hazard_immune_until: f64,
    /// Currency locked against the controlling player. Zero on split pieces.
    pub stake: u64,
    /// Currency won from eliminations in this match.
    pub wallet_earnings: u64,
}

impl Cell {
    /// Create a new controller cell.
    pub fn new(
        id: CellId,
        owner: SessionId,
        user_id: Option<String>,
        name: String,
        position: Vec2,
        mass: f32,
    ) -> Self {
        Self {
            id,
            owner,
            user_id,
            name,
            color: Color::default(),
            position,
            velocity: Vec2::ZERO,
            momentum: Vec2::ZERO,
            mass,
            radius: radius_for_mass(mass),
            score: 0.0,
            alive: true,
            heading: Vec2::ZERO,
            last_input_seq: 0,
            is_split_piece: false,
            no_merge_until: 0.0,
            last_split_time: f64::NEG_INFINITY,
            hazard_immune_until: 0.0,
            stake: 0,
            wallet_earnings: 0,
        }
    }

    /// Create a split piece owned by `parent`'s session.
    ///
    /// The piece inherits position, velocity and identity but carries no
    /// stake and starts with zero score.
    pub fn split_from(parent: &Cell, id: CellId, mass: f32) -> Self {
        Self {
            id,
            owner: parent.owner,
            user_id: parent.user_id.clone(),
            name: parent.name.clone(),
            color: parent.color,
            position: parent.position,
            velocity: parent.velocity,
            momentum: Vec2::ZERO,
            mass,
            radius: radius_for_mass(mass),
            score: 0.0,
            alive: true,
            heading: Vec2::ZERO,
            last_input_seq: 0,
            is_split_piece: true,
            no_merge_until: parent.no_merge_until,
            last_split_time: parent.last_split_time,
            hazard_immune_until: parent.hazard_immune_until,
            stake: 0,
            wallet_earnings: 0,
        }
    }

    #[inline]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Set the mass and recompute the radius.
    #[inline]
    pub fn set_mass(&mut self, mass: f32) {
        self.mass = mass;
        self.radius = radius_for_mass(mass);
    }

    #[inline]
    pub fn add_mass(&mut self, amount: f32) {
        self.set_mass(self.mass + amount);
    }

    #[inline]
    pub fn is_controller(&self) -> bool {
        !self.is_split_piece
    }
}

impl Body for Cell {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    fn radius(&self) -> f32 {
        self.radius
    }

    fn halt(&mut self) {
        self.velocity = Vec2::ZERO;
        self.momentum = Vec2::ZERO;
    }
}
