//! Split and merge of ownership groups.
//!
//! A group is one controller plus the split pieces whose `owner` is its
//! session. Splitting halves the controller and ejects a piece along the
//! split direction; once the no-merge window elapses the group's cells are
//! pulled toward their mass-weighted centroid and pieces touching the
//! controller are absorbed back into it.

use crate::config::SplitConfig;
use crate::entity::{Body, Cell, CellId, SessionId};
use crate::world::World;
use glam::Vec2;
use std::collections::BTreeMap;

/// Split and merge constants in simulation units.
#[derive(Debug, Clone, Copy)]
pub struct SplitRules {
    pub min_mass: f32,
    /// Seconds between splits.
    pub cooldown: f64,
    pub max_cells: usize,
    pub impulse: f32,
    /// Seconds a fresh split stays unmergeable.
    pub merge_delay: f64,
    pub attraction_rate: f32,
    pub spacing_factor: f32,
    pub max_acceleration: f32,
    pub momentum_transfer: f32,
}

impl From<&SplitConfig> for SplitRules {
    fn from(config: &SplitConfig) -> Self {
        Self {
            min_mass: config.min_mass,
            cooldown: config.cooldown_ms as f64 / 1000.0,
            max_cells: config.max_cells,
            impulse: config.impulse,
            merge_delay: config.merge_delay_ms as f64 / 1000.0,
            attraction_rate: config.attraction_rate,
            spacing_factor: config.spacing_factor,
            max_acceleration: config.max_acceleration,
            momentum_transfer: config.momentum_transfer,
        }
    }
}

/// Split a session's controller toward `target`.
///
/// Returns the new piece's id, or `None` with no state change when the
/// controller is missing or dead, too light, still cooling down, or the
/// group is at its cell cap.
pub fn try_split(world: &mut World, rules: &SplitRules, session: SessionId, target: Vec2) -> Option<CellId> {
    let now = world.time();
    let group_len = world.group_len(session);
    let controller = world.controller(session)?;
    if !controller.alive
        || controller.mass() < rules.min_mass
        || now - controller.last_split_time < rules.cooldown
        || group_len >= rules.max_cells
    {
        return None;
    }

    let direction = (target - controller.position)
        .try_normalize()
        .or_else(|| controller.heading.try_normalize())
        .unwrap_or(Vec2::X);

    let id = world.next_id();
    let controller = world.controller_mut(session)?;
    let half = controller.mass() / 2.0;
    controller.set_mass(half);
    controller.no_merge_until = now + rules.merge_delay;
    controller.last_split_time = now;

    let mut piece = Cell::split_from(controller, id, half);
    piece.momentum = direction * rules.impulse;
    world.cells.insert(id, piece);
    Some(id)
}

/// Pull every merge-eligible cell of each multi-cell group toward the
/// group's mass-weighted centroid.
///
/// Acceleration grows with distance beyond `radius * spacing_factor` and
/// total group mass, capped at `max_acceleration`, and is added to
/// momentum scaled by `dt`.
pub fn apply_attraction(world: &mut World, rules: &SplitRules, dt: f32) {
    let now = world.time();

    // owner -> (mass-weighted position sum, total mass, living cells)
    let mut groups: BTreeMap<SessionId, (Vec2, f32, usize)> = BTreeMap::new();
    for cell in world.cells.values().filter(|c| c.alive) {
        let entry = groups.entry(cell.owner).or_insert((Vec2::ZERO, 0.0, 0));
        entry.0 += cell.position * cell.mass();
        entry.1 += cell.mass();
        entry.2 += 1;
    }

    for cell in world.cells.values_mut() {
        if !cell.alive || now < cell.no_merge_until {
            continue;
        }
        let Some(&(weighted, total_mass, count)) = groups.get(&cell.owner) else {
            continue;
        };
        if count < 2 || total_mass <= 0.0 {
            continue;
        }

        let centroid = weighted / total_mass;
        let offset = centroid - cell.position;
        let distance = offset.length();
        let Some(direction) = offset.try_normalize() else {
            continue;
        };
        let slack = (distance - cell.radius() * rules.spacing_factor).max(0.0);
        let accel = (slack * total_mass * rules.attraction_rate).min(rules.max_acceleration);
        cell.momentum += direction * accel * dt;
    }
}

/// Absorb split pieces that touch their living controller once both
/// no-merge windows have elapsed. Returns the merged piece ids.
pub fn merge_pieces(world: &mut World, rules: &SplitRules) -> Vec<CellId> {
    let now = world.time();
    let candidates: Vec<CellId> = world
        .cells
        .values()
        .filter(|c| c.alive && c.is_split_piece && now >= c.no_merge_until)
        .map(|c| c.id)
        .collect();

    let mut merged = Vec::new();
    for piece_id in candidates {
        let Some(piece) = world.cells.get(&piece_id) else {
            continue;
        };
        let owner = piece.owner;
        let Some(controller) = world.controller(owner) else {
            continue;
        };
        if !controller.alive || now < controller.no_merge_until {
            continue;
        }
        if piece.position.distance(controller.position) > piece.radius() + controller.radius() {
            continue;
        }

        let Some(piece) = world.remove_cell(piece_id) else {
            continue;
        };
        if let Some(controller) = world.controller_mut(owner) {
            controller.add_mass(piece.mass());
            controller.score += piece.score;
            controller.momentum += piece.momentum * rules.momentum_transfer;
        }
        merged.push(piece_id);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 60.0;

    fn rules() -> SplitRules {
        SplitRules::from(&SplitConfig::default())
    }

    fn world_with(mass: f32) -> World {
        let mut world = World::new(6000.0, 2800.0, DT);
        let id = world.next_id();
        world
            .cells
            .insert(id, Cell::new(id, id, None, "p".into(), Vec2::ZERO, mass));
        world
    }

    #[test]
    fn test_split_halves_and_ejects_toward_target() {
        let mut world = world_with(80.0);
        let piece = try_split(&mut world, &rules(), 1, Vec2::new(0.0, 50.0)).unwrap();

        let controller = &world.cells[&1];
        let piece = &world.cells[&piece];
        assert_eq!(controller.mass(), 40.0);
        assert_eq!(piece.mass(), 40.0);
        assert!(piece.is_split_piece);
        assert_eq!(piece.owner, 1);
        let dir = piece.momentum.normalize();
        assert!((dir - Vec2::Y).length() < 1e-6);
        assert!((piece.momentum.length() - rules().impulse).abs() < 1e-3);
        assert_eq!(controller.no_merge_until, rules().merge_delay);
        assert_eq!(piece.no_merge_until, rules().merge_delay);
    }

    #[test]
    fn test_split_preconditions_leave_state_untouched() {
        let r = rules();

        let mut light = world_with(r.min_mass - 1.0);
        assert_eq!(try_split(&mut light, &r, 1, Vec2::X), None);
        assert_eq!(light.cells.len(), 1);
        assert_eq!(light.cells[&1].mass(), r.min_mass - 1.0);

        let mut cooling = world_with(400.0);
        assert!(try_split(&mut cooling, &r, 1, Vec2::X).is_some());
        let before = cooling.cells[&1].mass();
        assert_eq!(try_split(&mut cooling, &r, 1, Vec2::X), None);
        assert_eq!(cooling.cells[&1].mass(), before);

        let mut capped = world_with(4000.0);
        let capped_rules = SplitRules { max_cells: 2, cooldown: 0.0, ..r };
        assert!(try_split(&mut capped, &capped_rules, 1, Vec2::X).is_some());
        assert_eq!(try_split(&mut capped, &capped_rules, 1, Vec2::X), None);
        assert_eq!(capped.cells.len(), 2);

        let mut missing = world_with(80.0);
        assert_eq!(try_split(&mut missing, &r, 42, Vec2::X), None);
    }

    #[test]
    fn test_split_at_own_position_uses_heading() {
        let mut world = world_with(80.0);
        world.cells.get_mut(&1).unwrap().heading = Vec2::NEG_Y;
        let piece = try_split(&mut world, &rules(), 1, Vec2::ZERO).unwrap();
        assert!((world.cells[&piece].momentum.normalize() - Vec2::NEG_Y).length() < 1e-6);
    }

    #[test]
    fn test_farther_piece_accelerates_more_within_cap() {
        let r = rules();
        let mut world = World::new(6000.0, 2800.0, DT);
        let controller = Cell::new(1, 1, None, "p".into(), Vec2::ZERO, 40.0);
        let mut near = Cell::split_from(&controller, 2, 40.0);
        near.position = Vec2::new(100.0, 0.0);
        let mut far = Cell::split_from(&controller, 3, 40.0);
        far.position = Vec2::new(-400.0, 0.0);
        world.cells.insert(1, controller);
        world.cells.insert(2, near);
        world.cells.insert(3, far);

        let dt = DT as f32;
        apply_attraction(&mut world, &r, dt);

        let near = world.cells[&2].momentum.length();
        let far = world.cells[&3].momentum.length();
        assert!(far >= near);
        assert!(near <= r.max_acceleration * dt + 1e-4);
        assert!(far <= r.max_acceleration * dt + 1e-4);
    }

    #[test]
    fn test_attraction_waits_for_no_merge_window() {
        let mut world = world_with(80.0);
        try_split(&mut world, &rules(), 1, Vec2::X).unwrap();
        for cell in world.cells.values_mut() {
            cell.momentum = Vec2::ZERO;
        }
        world.cells.get_mut(&2).unwrap().position = Vec2::new(500.0, 0.0);
        apply_attraction(&mut world, &rules(), DT as f32);
        assert!(world.cells.values().all(|c| c.momentum == Vec2::ZERO));
    }

    #[test]
    fn test_merge_requires_elapsed_windows_and_contact() {
        let r = rules();
        let mut world = world_with(80.0);
        let piece = try_split(&mut world, &r, 1, Vec2::X).unwrap();

        assert!(merge_pieces(&mut world, &r).is_empty());

        world.tick = (r.merge_delay / DT).ceil() as u64 + 1;
        world.cells.get_mut(&piece).unwrap().position = Vec2::new(1000.0, 0.0);
        assert!(merge_pieces(&mut world, &r).is_empty());

        {
            let cell = world.cells.get_mut(&piece).unwrap();
            cell.position = Vec2::new(10.0, 0.0);
            cell.score = 3.0;
            cell.momentum = Vec2::new(60.0, -20.0);
        }
        world.cells.get_mut(&1).unwrap().momentum = Vec2::new(0.0, 4.0);
        assert_eq!(merge_pieces(&mut world, &r), vec![piece]);
        assert_eq!(world.cells.len(), 1);
        assert_eq!(world.cells[&1].mass(), 80.0);
        assert_eq!(world.cells[&1].score, 3.0);

        let expected = Vec2::new(0.0, 4.0) + Vec2::new(60.0, -20.0) * r.momentum_transfer;
        assert!((world.cells[&1].momentum - expected).length() < 1e-4);
        assert_ne!(world.cells[&1].momentum, Vec2::new(0.0, 4.0));
    }

    #[test]
    fn test_orphan_piece_never_merges() {
        let r = rules();
        let mut world = world_with(80.0);
        let piece = try_split(&mut world, &r, 1, Vec2::X).unwrap();
        world.tick = (r.merge_delay / DT).ceil() as u64 + 1;
        world.cells.get_mut(&1).unwrap().alive = false;
        world.cells.get_mut(&piece).unwrap().position = Vec2::ZERO;
        assert!(merge_pieces(&mut world, &r).is_empty());
        assert!(world.cells.contains_key(&piece));
    }
}
