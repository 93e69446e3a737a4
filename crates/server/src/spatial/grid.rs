//! Uniform-grid spatial index.
//!
//! Items are bucketed by their bounding box over a fixed grid covering the
//! world square. Buckets are kept current on every insert and remove, so
//! queries never wait on a rebuild. Query results are sorted by id.

use glam::Vec2;
use std::collections::HashMap;

/// Buckets per side.
const GRID_SIZE: usize = 32;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Square bounds around a circle.
    #[inline]
    pub fn around(center: Vec2, radius: f32) -> Self {
        Self {
            min: center - Vec2::splat(radius),
            max: center + Vec2::splat(radius),
        }
    }

    /// Check if two bounds intersect. Touching edges do not count.
    #[inline]
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(other.min.x >= self.max.x
            || other.max.x <= self.min.x
            || other.min.y >= self.max.y
            || other.max.y <= self.min.y)
    }
}

/// Spatial hash over a fixed square.
///
/// Items outside the covered square land in the border buckets, so they are
/// still found; they just share buckets with everything else on that edge.
pub struct SpatialGrid {
    bounds: Bounds,
    cell_size: f32,
    entries: HashMap<u32, Bounds>,
    buckets: Vec<Vec<u32>>,
}

impl SpatialGrid {
    pub fn new(bounds: Bounds) -> Self {
        let side = (bounds.max.x - bounds.min.x).max(bounds.max.y - bounds.min.y);
        Self {
            bounds,
            cell_size: (side / GRID_SIZE as f32).max(f32::EPSILON),
            entries: HashMap::new(),
            buckets: vec![Vec::new(); GRID_SIZE * GRID_SIZE],
        }
    }

    /// Grid for a world square of side `size` centered on the origin.
    pub fn for_world(size: f32) -> Self {
        let half = size / 2.0;
        Self::new(Bounds::new(Vec2::splat(-half), Vec2::splat(half)))
    }

    #[inline]
    fn axis(&self, value: f32, min: f32) -> usize {
        let cell = ((value - min) / self.cell_size).floor();
        if cell.is_nan() || cell < 0.0 {
            0
        } else {
            (cell as usize).min(GRID_SIZE - 1)
        }
    }

    /// Inclusive bucket ranges `(x0, x1, y0, y1)` covered by `bound`.
    #[inline]
    fn range(&self, bound: &Bounds) -> (usize, usize, usize, usize) {
        (
            self.axis(bound.min.x, self.bounds.min.x),
            self.axis(bound.max.x, self.bounds.min.x),
            self.axis(bound.min.y, self.bounds.min.y),
            self.axis(bound.max.y, self.bounds.min.y),
        )
    }

    /// Insert an item, or move it if already present.
    pub fn insert(&mut self, id: u32, center: Vec2, radius: f32) {
        self.remove(id);
        let bound = Bounds::around(center, radius);
        let (x0, x1, y0, y1) = self.range(&bound);
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                self.buckets[gy * GRID_SIZE + gx].push(id);
            }
        }
        self.entries.insert(id, bound);
    }

    pub fn remove(&mut self, id: u32) {
        let Some(bound) = self.entries.remove(&id) else {
            return;
        };
        let (x0, x1, y0, y1) = self.range(&bound);
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                let bucket = &mut self.buckets[gy * GRID_SIZE + gx];
                if let Some(pos) = bucket.iter().position(|&other| other == id) {
                    bucket.swap_remove(pos);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids whose bounds intersect the square around a circle, sorted.
    pub fn query(&self, center: Vec2, radius: f32) -> Vec<u32> {
        let bound = Bounds::around(center, radius);
        let (x0, x1, y0, y1) = self.range(&bound);

        let mut found = Vec::new();
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                for &id in &self.buckets[gy * GRID_SIZE + gx] {
                    if self.entries.get(&id).is_some_and(|b| b.intersects(&bound)) {
                        found.push(id);
                    }
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }
}

impl std::fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialGrid")
            .field("items", &self.entries.len())
            .field("bounds", &self.bounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bounds_intersects() {
        let a = Bounds::new(Vec2::ZERO, Vec2::splat(10.0));
        let b = Bounds::new(Vec2::splat(5.0), Vec2::splat(15.0));
        let c = Bounds::new(Vec2::splat(20.0), Vec2::splat(30.0));
        let touching = Bounds::new(Vec2::new(10.0, 0.0), Vec2::new(20.0, 10.0));

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&touching));
    }

    #[test]
    fn test_insert_find() {
        let mut grid = SpatialGrid::for_world(200.0);
        grid.insert(3, Vec2::ZERO, 10.0);
        grid.insert(2, Vec2::new(50.0, 50.0), 10.0);
        grid.insert(1, Vec2::new(-50.0, -50.0), 10.0);
        assert_eq!(grid.len(), 3);

        assert_eq!(grid.query(Vec2::ZERO, 20.0), vec![3]);
        assert_eq!(grid.query(Vec2::new(50.0, 50.0), 20.0), vec![2]);
        assert_eq!(grid.query(Vec2::ZERO, 100.0), vec![1, 2, 3]);
    }

    #[test]
    fn test_move_and_remove() {
        let mut grid = SpatialGrid::for_world(200.0);
        grid.insert(7, Vec2::new(-80.0, 0.0), 5.0);
        grid.insert(7, Vec2::new(80.0, 0.0), 5.0);
        assert_eq!(grid.len(), 1);
        assert!(grid.query(Vec2::new(-80.0, 0.0), 10.0).is_empty());
        assert_eq!(grid.query(Vec2::new(80.0, 0.0), 10.0), vec![7]);

        grid.remove(7);
        grid.remove(7);
        assert!(grid.is_empty());
        assert!(grid.query(Vec2::new(80.0, 0.0), 10.0).is_empty());
    }

    #[test]
    fn test_items_outside_the_square_are_found() {
        let mut grid = SpatialGrid::for_world(100.0);
        grid.insert(1, Vec2::new(500.0, -500.0), 4.0);
        assert_eq!(grid.query(Vec2::new(498.0, -498.0), 4.0), vec![1]);
    }

    proptest! {
        #[test]
        fn test_query_finds_every_overlapping_circle(
            items in prop::collection::vec((-300.0f32..300.0, -300.0f32..300.0, 1.0f32..60.0), 1..60),
            target in (-300.0f32..300.0, -300.0f32..300.0, 1.0f32..80.0),
        ) {
            let mut grid = SpatialGrid::for_world(600.0);
            for (id, &(x, y, r)) in items.iter().enumerate() {
                grid.insert(id as u32, Vec2::new(x, y), r);
            }
            let center = Vec2::new(target.0, target.1);
            let found = grid.query(center, target.2);

            for (id, &(x, y, r)) in items.iter().enumerate() {
                if Vec2::new(x, y).distance(center) < r + target.2 {
                    prop_assert!(found.contains(&(id as u32)));
                }
            }
            prop_assert!(found.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
