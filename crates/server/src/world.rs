//! World state.
//!
//! Owns every entity in one room: player cells, coins and viruses, keyed by
//! id in ordered maps so that iteration order (and therefore the whole
//! simulation) is reproducible for a given seed.
//!
//! Each entity kind also has a [`SpatialGrid`] used as the collision broad
//! phase. Spawns and removals made through `World` keep the grids current;
//! anything that moves entities or edits the maps directly must call
//! [`World::rebuild_index`] before the next query.

use crate::entity::{Body, Cell, CellId, Coin, SessionId, Virus};
use crate::spatial::{PlayableArea, SpatialGrid};
use glam::Vec2;
use protocol::Color;
use rand::Rng;
use std::collections::BTreeMap;

/// The game world of one room.
#[derive(Debug)]
pub struct World {
    /// Next entity id to assign.
    next_id: u32,
    /// Side of the square world, centered on the origin.
    pub size: f32,
    pub area: PlayableArea,
    /// Completed simulation steps.
    pub tick: u64,
    /// Fixed step length in seconds.
    pub dt: f64,

    pub cells: BTreeMap<CellId, Cell>,
    pub coins: BTreeMap<u32, Coin>,
    pub viruses: BTreeMap<u32, Virus>,

    cell_index: SpatialGrid,
    coin_index: SpatialGrid,
    virus_index: SpatialGrid,
}

impl World {
    /// Create an empty world.
    pub fn new(size: f32, playable_radius: f32, dt: f64) -> Self {
        Self {
            next_id: 1,
            size,
            area: PlayableArea::new(Vec2::ZERO, playable_radius),
            tick: 0,
            dt,
            cells: BTreeMap::new(),
            coins: BTreeMap::new(),
            viruses: BTreeMap::new(),
            cell_index: SpatialGrid::for_world(size),
            coin_index: SpatialGrid::for_world(size),
            virus_index: SpatialGrid::for_world(size),
        }
    }

    /// Get the next entity id.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1; // Skip 0
        }
        id
    }

    /// Logical simulation time in seconds.
    #[inline]
    pub fn time(&self) -> f64 {
        self.tick as f64 * self.dt
    }

    /// Generate a random color.
    #[inline]
    pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> Color {
        Color::new(
            rng.random_range(50..=255),
            rng.random_range(50..=255),
            rng.random_range(50..=255),
        )
    }

    /// Get the controller cell of a session.
    #[inline]
    pub fn controller(&self, session: SessionId) -> Option<&Cell> {
        self.cells.get(&session).filter(|c| c.is_controller())
    }

    /// Get the controller cell of a session mutably.
    #[inline]
    pub fn controller_mut(&mut self, session: SessionId) -> Option<&mut Cell> {
        self.cells.get_mut(&session).filter(|c| c.is_controller())
    }

    /// Ids of every cell in a session's ownership group, controller included.
    pub fn group(&self, session: SessionId) -> Vec<CellId> {
        self.cells
            .values()
            .filter(|c| c.owner == session)
            .map(|c| c.id)
            .collect()
    }

    /// Number of living cells in a session's ownership group.
    pub fn group_len(&self, session: SessionId) -> usize {
        self.cells
            .values()
            .filter(|c| c.owner == session && c.alive)
            .count()
    }

    /// Sum of mass over a session's ownership group.
    pub fn group_mass(&self, session: SessionId) -> f32 {
        self.cells
            .values()
            .filter(|c| c.owner == session && c.alive)
            .map(Cell::mass)
            .sum()
    }

    /// Remove a whole ownership group, returning the removed cells.
    pub fn remove_group(&mut self, session: SessionId) -> Vec<Cell> {
        let ids = self.group(session);
        ids.into_iter().filter_map(|id| self.remove_cell(id)).collect()
    }

    pub fn remove_cell(&mut self, id: CellId) -> Option<Cell> {
        self.cell_index.remove(id);
        self.cells.remove(&id)
    }

    pub fn remove_coin(&mut self, id: u32) -> Option<Coin> {
        self.coin_index.remove(id);
        self.coins.remove(&id)
    }

    pub fn remove_virus(&mut self, id: u32) -> Option<Virus> {
        self.virus_index.remove(id);
        self.viruses.remove(&id)
    }

    /// Rebuild every spatial index from the entity maps.
    pub fn rebuild_index(&mut self) {
        self.cell_index.clear();
        for cell in self.cells.values().filter(|c| c.alive) {
            self.cell_index.insert(cell.id, cell.position, cell.radius());
        }
        self.coin_index.clear();
        for coin in self.coins.values() {
            self.coin_index.insert(coin.id, coin.position, coin.radius);
        }
        self.virus_index.clear();
        for virus in self.viruses.values() {
            self.virus_index.insert(virus.id, virus.position, virus.radius);
        }
    }

    /// Refresh one cell's index entry after it moved or changed mass.
    pub fn reindex_cell(&mut self, id: CellId) {
        match self.cells.get(&id).filter(|c| c.alive) {
            Some(cell) => self.cell_index.insert(id, cell.position, cell.radius()),
            None => self.cell_index.remove(id),
        }
    }

    /// Indexed cells whose bounds overlap a circle, sorted by id.
    #[inline]
    pub fn cells_near(&self, position: Vec2, radius: f32) -> Vec<CellId> {
        self.cell_index.query(position, radius)
    }

    /// Indexed coins whose bounds overlap a circle, sorted by id.
    #[inline]
    pub fn coins_near(&self, position: Vec2, radius: f32) -> Vec<u32> {
        self.coin_index.query(position, radius)
    }

    /// Indexed viruses whose bounds overlap a circle, sorted by id.
    #[inline]
    pub fn viruses_near(&self, position: Vec2, radius: f32) -> Vec<u32> {
        self.virus_index.query(position, radius)
    }

    /// Spawn one coin at a sampled position.
    pub fn spawn_coin<R: Rng + ?Sized>(&mut self, rng: &mut R, value: f32, radius: f32) -> u32 {
        let position = self.area.sample_position(rng, radius);
        let id = self.next_id();
        self.coins.insert(id, Coin::new(id, position, value, radius));
        self.coin_index.insert(id, position, radius);
        id
    }

    /// Spawn one virus with a radius drawn from the configured band.
    pub fn spawn_virus<R: Rng + ?Sized>(&mut self, rng: &mut R, min_radius: f32, max_radius: f32) -> u32 {
        let radius = if max_radius > min_radius {
            rng.random_range(min_radius..max_radius)
        } else {
            min_radius
        };
        let position = self.area.sample_position(rng, radius);
        let id = self.next_id();
        self.viruses.insert(id, Virus::new(id, position, radius));
        self.virus_index.insert(id, position, radius);
        id
    }

    /// Top coins up to `max_count`.
    pub fn replenish_coins<R: Rng + ?Sized>(&mut self, rng: &mut R, max_count: usize, value: f32, radius: f32) -> usize {
        let missing = max_count.saturating_sub(self.coins.len());
        for _ in 0..missing {
            self.spawn_coin(rng, value, radius);
        }
        missing
    }

    /// Top viruses up to `count`.
    pub fn replenish_viruses<R: Rng + ?Sized>(&mut self, rng: &mut R, count: usize, min_radius: f32, max_radius: f32) -> usize {
        let missing = count.saturating_sub(self.viruses.len());
        for _ in 0..missing {
            self.spawn_virus(rng, min_radius, max_radius);
        }
        missing
    }

    /// Get the count of each entity type.
    #[inline]
    pub fn counts(&self) -> EntityCounts {
        EntityCounts {
            cells: self.cells.len(),
            controllers: self.cells.values().filter(|c| c.is_controller()).count(),
            coins: self.coins.len(),
            viruses: self.viruses.len(),
        }
    }
}

/// Entity count statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    pub cells: usize,
    pub controllers: usize,
    pub coins: usize,
    pub viruses: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_ids_are_unique_and_skip_zero() {
        let mut world = World::new(100.0, 40.0, 1.0 / 60.0);
        world.next_id = u32::MAX;
        assert_eq!(world.next_id(), u32::MAX);
        assert_eq!(world.next_id(), 1);
    }

    #[test]
    fn test_replenish_reaches_target_inside_area() {
        let mut world = World::new(1000.0, 400.0, 1.0 / 60.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(world.replenish_coins(&mut rng, 50, 1.0, 6.0), 50);
        assert_eq!(world.replenish_coins(&mut rng, 50, 1.0, 6.0), 0);
        world.replenish_viruses(&mut rng, 5, 30.0, 45.0);
        assert_eq!(world.counts().coins, 50);
        assert_eq!(world.counts().viruses, 5);
        assert!(world.coins.values().all(|c| world.area.contains(c)));
        assert!(world.viruses.values().all(|v| world.area.contains(v)));
        assert!(world.viruses.values().all(|v| (30.0..45.0).contains(&v.radius())));
    }

    #[test]
    fn test_remove_group_takes_pieces() {
        let mut world = World::new(1000.0, 400.0, 1.0 / 60.0);
        let controller = Cell::new(1, 1, None, "a".into(), Vec2::ZERO, 80.0);
        let piece = Cell::split_from(&controller, 2, 40.0);
        let other = Cell::new(3, 3, None, "b".into(), Vec2::ZERO, 20.0);
        world.cells.insert(1, controller);
        world.cells.insert(2, piece);
        world.cells.insert(3, other);

        let removed = world.remove_group(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(world.cells.keys().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_index_follows_spawns_and_removals() {
        let mut world = World::new(1000.0, 400.0, 1.0 / 60.0);
        let mut rng = StdRng::seed_from_u64(2);
        let coin = world.spawn_coin(&mut rng, 1.0, 6.0);
        let position = world.coins[&coin].position;
        assert_eq!(world.coins_near(position, 1.0), vec![coin]);

        world.remove_coin(coin);
        assert!(world.coins_near(position, 1.0).is_empty());

        let virus = world.spawn_virus(&mut rng, 30.0, 45.0);
        let position = world.viruses[&virus].position;
        assert_eq!(world.viruses_near(position, 1.0), vec![virus]);
        assert!(world.remove_virus(virus).is_some());
        assert!(world.viruses_near(position, 1.0).is_empty());
    }

    #[test]
    fn test_rebuild_index_picks_up_direct_edits() {
        let mut world = World::new(1000.0, 400.0, 1.0 / 60.0);
        world.cells.insert(1, Cell::new(1, 1, None, "a".into(), Vec2::new(-300.0, 0.0), 20.0));
        world.cells.insert(2, Cell::new(2, 2, None, "b".into(), Vec2::new(300.0, 0.0), 20.0));
        assert!(world.cells_near(Vec2::new(-300.0, 0.0), 5.0).is_empty());

        world.rebuild_index();
        assert_eq!(world.cells_near(Vec2::new(-300.0, 0.0), 5.0), vec![1]);

        world.cells.get_mut(&1).unwrap().position = Vec2::new(300.0, 0.0);
        world.reindex_cell(1);
        assert_eq!(world.cells_near(Vec2::new(300.0, 0.0), 5.0), vec![1, 2]);

        world.remove_group(2);
        assert_eq!(world.cells_near(Vec2::new(300.0, 0.0), 5.0), vec![1]);
    }
}
