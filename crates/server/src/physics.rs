//! Movement integration.
//!
//! Player velocity steers toward the heading under per-tick friction;
//! momentum is a separate vector that carries split ejection and merge
//! attraction and decays exponentially. Momentum is applied before
//! velocity, then the body is clamped to the playable area.

use crate::config::{PhysicsConfig, PlayerConfig};
use crate::entity::Cell;
use crate::spatial::PlayableArea;
use glam::Vec2;

/// Movement constants resolved for one tick rate.
#[derive(Debug, Clone, Copy)]
pub struct Motion {
    /// Fixed step in seconds.
    pub dt: f32,
    /// Velocity retention per tick at the running tick rate.
    pub friction_per_tick: f32,
    pub movement_scale: f32,
    pub momentum_drag: f32,
    pub momentum_floor: f32,
    pub speed_factor: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

impl Motion {
    /// Resolve movement constants for `tick_rate_hz`.
    ///
    /// `friction` is tuned for `friction_tuned_hz`; the per-tick constant is
    /// rescaled so the per-second decay curve is the same at any tick rate.
    pub fn new(physics: &PhysicsConfig, player: &PlayerConfig, tick_rate_hz: u32) -> Self {
        let tick_rate = tick_rate_hz.max(1) as f32;
        let tuned = physics.friction_tuned_hz.max(1) as f32;
        Self {
            dt: 1.0 / tick_rate,
            friction_per_tick: physics.friction.powf(tuned / tick_rate),
            movement_scale: physics.movement_scale,
            momentum_drag: physics.momentum_drag,
            momentum_floor: physics.momentum_floor,
            speed_factor: player.speed_factor,
            min_speed: player.min_speed,
            max_speed: player.max_speed,
        }
    }

    /// Top speed of a cell of `mass`; heavier cells are slower.
    #[inline]
    pub fn speed_for_mass(&self, mass: f32) -> f32 {
        if mass <= 0.0 {
            return self.max_speed;
        }
        (self.speed_factor / mass).clamp(self.min_speed, self.max_speed)
    }

    /// Blend velocity toward `heading * speed` with the per-tick friction.
    ///
    /// With a zero heading the cell coasts to a stop.
    pub fn steer(&self, cell: &mut Cell, heading: Vec2) {
        let f = self.friction_per_tick;
        let target = heading * self.speed_for_mass(cell.mass());
        cell.velocity = cell.velocity * f + target * (1.0 - f);
    }

    /// Apply momentum then velocity to the position and decay momentum.
    pub fn integrate(&self, cell: &mut Cell) {
        cell.position += cell.momentum * self.dt;
        cell.momentum *= (-self.momentum_drag * self.dt).exp();
        if cell.momentum.length() < self.momentum_floor {
            cell.momentum = Vec2::ZERO;
        }
        cell.position += cell.velocity * self.dt * self.movement_scale;
    }

    /// One full movement step for a cell: steer, integrate and clamp.
    pub fn step(&self, cell: &mut Cell, heading: Vec2, area: &PlayableArea) {
        self.steer(cell, heading);
        self.integrate(cell);
        area.clamp(cell, true);
    }
}
