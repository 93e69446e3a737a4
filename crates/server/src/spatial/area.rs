//! Circular playable area: spawn sampling and boundary enforcement.

use crate::entity::Body;
use glam::Vec2;
use rand::Rng;
use std::f32::consts::TAU;

/// The circular region entities are confined to.
#[derive(Debug, Clone, Copy)]
pub struct PlayableArea {
    pub center: Vec2,
    pub radius: f32,
}

impl PlayableArea {
    pub fn new(center: Vec2, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sample a point uniformly by area within `radius - padding` of the center.
    ///
    /// The radial coordinate is `sqrt(u)`-scaled; linear scaling would crowd
    /// samples toward the middle.
    pub fn sample_position<R: Rng + ?Sized>(&self, rng: &mut R, padding: f32) -> Vec2 {
        let max = (self.radius - padding).max(0.0);
        let r = max * rng.random::<f32>().sqrt();
        let theta = rng.random_range(0.0..TAU);
        self.center + Vec2::from_angle(theta) * r
    }

    /// Farthest distance from the center a body of `radius` may sit.
    #[inline]
    pub fn limit_for(&self, radius: f32) -> f32 {
        (self.radius - radius).max(0.0)
    }

    /// Whether a body fits entirely inside the area.
    #[inline]
    pub fn contains<B: Body + ?Sized>(&self, body: &B) -> bool {
        body.position().distance(self.center) <= self.limit_for(body.radius())
    }

    /// Pull a body that pokes out of the area back onto its limit circle.
    ///
    /// With `reset_motion` the body is halted as well. Returns whether the
    /// body was moved.
    pub fn clamp<B: Body + ?Sized>(&self, body: &mut B, reset_motion: bool) -> bool {
        let limit = self.limit_for(body.radius());
        let offset = body.position() - self.center;
        let distance = offset.length();
        if distance <= limit {
            return false;
        }

        let direction = offset.try_normalize().unwrap_or(Vec2::X);
        body.set_position(self.center + direction * limit);
        if reset_motion {
            body.halt();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Cell, Coin};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const EPS: f32 = 1e-3;

    #[test]
    fn test_clamp_resets_motion() {
        let area = PlayableArea::new(Vec2::ZERO, 100.0);
        let mut cell = Cell::new(1, 1, None, "p".into(), Vec2::new(500.0, 0.0), 20.0);
        cell.velocity = Vec2::new(10.0, 0.0);
        cell.momentum = Vec2::new(3.0, 3.0);

        assert!(area.clamp(&mut cell, true));
        assert!((cell.position.x - (100.0 - cell.radius())).abs() < EPS);
        assert_eq!(cell.velocity, Vec2::ZERO);
        assert_eq!(cell.momentum, Vec2::ZERO);
    }

    #[test]
    fn test_clamp_keeps_motion_when_asked() {
        let area = PlayableArea::new(Vec2::ZERO, 100.0);
        let mut cell = Cell::new(1, 1, None, "p".into(), Vec2::new(0.0, -400.0), 20.0);
        cell.velocity = Vec2::new(0.0, -10.0);
        assert!(area.clamp(&mut cell, false));
        assert_eq!(cell.velocity, Vec2::new(0.0, -10.0));
    }

    #[test]
    fn test_inside_body_untouched() {
        let area = PlayableArea::new(Vec2::ZERO, 100.0);
        let mut coin = Coin::new(1, Vec2::new(10.0, 10.0), 1.0, 5.0);
        assert!(!area.clamp(&mut coin, false));
        assert_eq!(coin.position, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_oversized_body_goes_to_center() {
        let area = PlayableArea::new(Vec2::new(5.0, 5.0), 10.0);
        let mut cell = Cell::new(1, 1, None, "p".into(), Vec2::new(8.0, 5.0), 10_000.0);
        area.clamp(&mut cell, true);
        assert_eq!(cell.position, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn test_sampling_is_area_uniform() {
        // Half the area lies outside radius R / sqrt(2).
        let area = PlayableArea::new(Vec2::ZERO, 1000.0);
        let mut rng = StdRng::seed_from_u64(7);
        let inner = 1000.0 / 2f32.sqrt();
        let n = 20_000;
        let outside = (0..n)
            .filter(|_| area.sample_position(&mut rng, 0.0).length() > inner)
            .count();
        let fraction = outside as f32 / n as f32;
        assert!((fraction - 0.5).abs() < 0.02, "fraction = {fraction}");
    }

    proptest! {
        #[test]
        fn test_samples_respect_padding(seed in any::<u64>(), padding in 0.0f32..900.0) {
            let area = PlayableArea::new(Vec2::new(-50.0, 20.0), 1000.0);
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..32 {
                let p = area.sample_position(&mut rng, padding);
                prop_assert!(p.distance(area.center) <= 1000.0 - padding + EPS);
            }
        }

        #[test]
        fn test_clamp_establishes_boundary(x in -5000.0f32..5000.0, y in -5000.0f32..5000.0, mass in 1.0f32..2000.0) {
            let area = PlayableArea::new(Vec2::ZERO, 800.0);
            let mut cell = Cell::new(1, 1, None, "p".into(), Vec2::new(x, y), mass);
            area.clamp(&mut cell, true);
            prop_assert!(cell.position.length() <= area.limit_for(cell.radius()) + EPS);
        }
    }
}
