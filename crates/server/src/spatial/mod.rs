//! Spatial utilities.
//!
//! The circular playable area (area-uniform spawn sampling and boundary
//! clamping) and the uniform grid used as the collision broad phase.

mod area;
mod grid;

pub use area::PlayableArea;
pub use grid::{Bounds, SpatialGrid};
