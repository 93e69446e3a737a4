//! Game entities.
//!
//! Player cells, coins and viruses, plus the [`Body`] trait shared by
//! everything that occupies space in the arena.

mod cell;
mod coin;
mod virus;

pub use cell::{Cell, CellId, SessionId};
pub use coin::Coin;
pub use virus::Virus;

use glam::Vec2;
use std::f32::consts::PI;

/// Scale `k` in `radius = sqrt(mass / π) * k`.
pub const RADIUS_SCALE: f32 = 10.0;

/// Radius of a cell with the given mass.
#[inline]
pub fn radius_for_mass(mass: f32) -> f32 {
    (mass / PI).sqrt() * RADIUS_SCALE
}

/// Anything with a position and a radius inside the arena.
pub trait Body {
    fn position(&self) -> Vec2;

    fn set_position(&mut self, position: Vec2);

    fn radius(&self) -> f32;

    /// Stop all motion. Static bodies have none.
    fn halt(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_radius_for_unit_pi_mass() {
        assert!((radius_for_mass(PI) - RADIUS_SCALE).abs() < 1e-5);
    }

    proptest! {
        #[test]
        fn test_radius_follows_mass(mass in 0.01f32..100_000.0) {
            let mut cell = Cell::new(1, 1, None, "p".into(), Vec2::ZERO, 1.0);
            cell.set_mass(mass);
            prop_assert_eq!(cell.radius(), (mass / PI).sqrt() * RADIUS_SCALE);
            prop_assert_eq!(cell.mass(), mass);
        }
    }
}
