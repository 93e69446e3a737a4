//! Coin (resource) pickup.

use super::Body;
use glam::Vec2;

/// A coin worth a fixed amount of mass.
#[derive(Debug, Clone)]
pub struct Coin {
    pub id: u32,
    pub position: Vec2,
    pub value: f32,
    pub radius: f32,
}

impl Coin {
    /// Create a new coin.
    pub fn new(id: u32, position: Vec2, value: f32, radius: f32) -> Self {
        Self {
            id,
            position,
            value,
            radius,
        }
    }
}

impl Body for Coin {
    fn position(&self) -> Vec2 {
        self.position
    }

    fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    fn radius(&self) -> f32 {
        self.radius
    }
}
