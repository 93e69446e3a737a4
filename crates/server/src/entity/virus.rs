//! Virus (hazard).

use super::Body;
use glam::Vec2;

/// A hazard that damages small cells and is popped by large ones.
#[derive(Debug, Clone)]
pub struct Virus {
    pub id: u32,
    pub position: Vec2,
    pub radius: f32,
}

impl Virus {
    /// Create a new virus.
    pub fn new(id: u32, position: Vec2, radius: f32) -> Self {
        Self { id, position, radius }
    }

    /// Whether a cell of `mass` pops this virus instead of being hurt by it.
    #[inline]
    pub fn is_popped_by(&self, mass: f32) -> bool {
        mass > 2.0 * self.radius
    }
}

impl Body for Virus {
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
