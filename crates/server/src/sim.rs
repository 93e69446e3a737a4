//! Fixed-timestep simulation.
//!
//! Wall-clock elapsed time is fed to [`Simulation::advance`], accumulated
//! and consumed in whole ticks. A second accumulator decides when a
//! broadcast snapshot is due, so the network cadence samples the world
//! without driving it.
//!
//! Per tick: merge attraction, movement for every cell, merging, then
//! collision resolution (coins, hazards, players) and replenishment.

use crate::collision::{self, CollisionEvent, CollisionRules};
use crate::config::{CoinConfig, Config, VirusConfig};
use crate::entity::{Body, Cell, CellId, SessionId, radius_for_mass};
use crate::physics::Motion;
use crate::split::{self, SplitRules};
use crate::world::World;
use glam::Vec2;
use protocol::packets::{LeaderboardEntry, PlayerFlags, SnapshotBody, SnapshotPlayer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// Leaderboard rows kept in a snapshot.
const LEADERBOARD_SIZE: usize = 10;

/// World state sampled for broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub players: Vec<SnapshotPlayer>,
    pub coins: Vec<SnapshotBody>,
    pub hazards: Vec<SnapshotBody>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// What one call to [`Simulation::advance`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Advance {
    pub steps: u32,
    /// Backlog discarded after hitting the catch-up cap, in seconds.
    pub dropped: f64,
    pub snapshot_due: bool,
}

/// One room's simulation.
pub struct Simulation {
    pub world: World,
    rng: StdRng,
    motion: Motion,
    split: SplitRules,
    collision: CollisionRules,
    start_mass: f32,
    coin: CoinConfig,
    virus: VirusConfig,

    step_secs: f64,
    broadcast_secs: f64,
    max_catch_up: u32,
    accumulator: f64,
    broadcast_accumulator: f64,

    events: Vec<CollisionEvent>,
}

impl Simulation {
    /// Create a populated world from configuration.
    pub fn new(config: &Config) -> Self {
        let sim = &config.simulation;
        let rng = match sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let tick_rate = sim.tick_rate_hz.max(1);
        let step_secs = 1.0 / tick_rate as f64;

        let mut simulation = Self {
            world: World::new(config.world.size, config.world.playable_radius, step_secs),
            rng,
            motion: Motion::new(&config.physics, &config.player, tick_rate),
            split: SplitRules::from(&config.split),
            collision: CollisionRules::new(
                &config.player,
                &config.coin,
                &config.virus,
                &config.elimination,
            ),
            start_mass: config.player.start_mass,
            coin: config.coin.clone(),
            virus: config.virus.clone(),
            step_secs,
            broadcast_secs: 1.0 / sim.broadcast_rate_hz.clamp(1, tick_rate) as f64,
            max_catch_up: sim.max_catch_up_steps.max(1),
            accumulator: 0.0,
            broadcast_accumulator: 0.0,
            events: Vec::new(),
        };
        simulation.replenish();
        simulation
    }

    /// Length of one tick in seconds.
    #[inline]
    pub fn step_secs(&self) -> f64 {
        self.step_secs
    }

    #[inline]
    pub fn split_rules(&self) -> &SplitRules {
        &self.split
    }

    /// Spawn a controller at a random point and return its session id.
    pub fn spawn_player(&mut self, user_id: Option<String>, name: String) -> SessionId {
        let padding = radius_for_mass(self.start_mass);
        let position = self.world.area.sample_position(&mut self.rng, padding);
        let id = self.world.next_id();
        let mut cell = Cell::new(id, id, user_id, name, position, self.start_mass);
        cell.color = World::random_color(&mut self.rng);
        self.world.cells.insert(id, cell);
        id
    }

    /// Remove a session's whole group.
    pub fn remove_player(&mut self, session: SessionId) -> Vec<Cell> {
        self.world.remove_group(session)
    }

    /// Apply a steering input.
    ///
    /// Returns `false` and changes nothing when the sequence is not newer
    /// than the last applied one, the direction is not finite, or the
    /// session has no controller. Only the direction is kept.
    pub fn set_heading(&mut self, session: SessionId, sequence: u32, direction: Vec2) -> bool {
        if !direction.is_finite() {
            return false;
        }
        let Some(controller) = self.world.controller_mut(session) else {
            return false;
        };
        if sequence <= controller.last_input_seq {
            return false;
        }
        controller.last_input_seq = sequence;
        controller.heading = direction.normalize_or_zero();
        true
    }

    /// Split a session's controller toward `target`.
    pub fn split(&mut self, session: SessionId, target: Vec2) -> Option<CellId> {
        if !target.is_finite() {
            return None;
        }
        split::try_split(&mut self.world, &self.split, session, target)
    }

    /// Feed wall-clock time and run as many whole ticks as it covers.
    pub fn advance(&mut self, elapsed: f64) -> Advance {
        let elapsed = elapsed.max(0.0);
        self.accumulator += elapsed;
        self.broadcast_accumulator += elapsed;

        let mut report = Advance::default();
        while self.accumulator >= self.step_secs && report.steps < self.max_catch_up {
            self.step();
            self.accumulator -= self.step_secs;
            report.steps += 1;
        }
        if report.steps == self.max_catch_up && self.accumulator >= self.step_secs {
            report.dropped = self.accumulator;
            self.accumulator = 0.0;
        }

        if self.broadcast_accumulator >= self.broadcast_secs {
            report.snapshot_due = true;
            self.broadcast_accumulator -= self.broadcast_secs;
            if self.broadcast_accumulator >= self.broadcast_secs {
                self.broadcast_accumulator = 0.0;
            }
        }
        report
    }

    /// Run exactly one tick.
    pub fn step(&mut self) {
        let dt = self.step_secs as f32;
        split::apply_attraction(&mut self.world, &self.split, dt);

        let headings: BTreeMap<SessionId, Vec2> = self
            .world
            .cells
            .values()
            .filter(|c| c.is_controller())
            .map(|c| (c.owner, c.heading))
            .collect();
        let area = self.world.area;
        for cell in self.world.cells.values_mut().filter(|c| c.alive) {
            let heading = headings.get(&cell.owner).copied().unwrap_or(Vec2::ZERO);
            self.motion.step(cell, heading, &area);
        }

        split::merge_pieces(&mut self.world, &self.split);
        collision::resolve(&mut self.world, &self.collision, &mut self.rng, &mut self.events);
        self.replenish();
        self.world.tick += 1;
    }

    fn replenish(&mut self) {
        self.world
            .replenish_coins(&mut self.rng, self.coin.max_count, self.coin.value, self.coin.radius);
        self.world.replenish_viruses(
            &mut self.rng,
            self.virus.count,
            self.virus.min_radius,
            self.virus.max_radius,
        );
    }

    /// Take the collision events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sum of score over a session's living cells.
    pub fn group_score(&self, session: SessionId) -> f32 {
        self.world
            .cells
            .values()
            .filter(|c| c.owner == session && c.alive)
            .map(|c| c.score)
            .sum()
    }

    /// Sample the world for broadcast.
    pub fn snapshot(&self) -> WorldSnapshot {
        let players = self
            .world
            .cells
            .values()
            .map(|c| SnapshotPlayer {
                id: c.id,
                owner: c.owner,
                position: c.position,
                radius: c.radius(),
                mass: c.mass(),
                color: c.color,
                flags: PlayerFlags {
                    is_split_piece: c.is_split_piece,
                    is_staked: c.stake > 0,
                },
                name: c.name.clone(),
            })
            .collect();

        let coins = self
            .world
            .coins
            .values()
            .map(|c| SnapshotBody {
                id: c.id,
                position: c.position,
                radius: c.radius,
            })
            .collect();

        let hazards = self
            .world
            .viruses
            .values()
            .map(|v| SnapshotBody {
                id: v.id,
                position: v.position,
                radius: v.radius,
            })
            .collect();

        let mut leaderboard: Vec<LeaderboardEntry> = self
            .world
            .cells
            .values()
            .filter(|c| c.is_controller())
            .map(|c| LeaderboardEntry {
                id: c.id,
                score: self.group_score(c.owner),
                name: c.name.clone(),
            })
            .collect();
        leaderboard.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        leaderboard.truncate(LEADERBOARD_SIZE);

        WorldSnapshot {
            tick: self.world.tick,
            players,
            coins,
            hazards,
            leaderboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(seed: u64) -> Config {
        let mut config = Config::default();
        config.simulation.seed = Some(seed);
        config
    }

    #[test]
    fn test_accumulator_runs_whole_ticks() {
        let mut sim = Simulation::new(&config(1));
        let step = sim.step_secs();

        let report = sim.advance(step * 2.5);
        assert_eq!(report.steps, 2);
        assert_eq!(sim.world.tick, 2);

        let report = sim.advance(step * 0.6);
        assert_eq!(report.steps, 1);
        assert_eq!(sim.world.tick, 3);
    }

    #[test]
    fn test_catch_up_is_capped() {
        let mut sim = Simulation::new(&config(1));
        let report = sim.advance(1.0);
        assert_eq!(report.steps, 8);
        assert!(report.dropped > 0.0);
        assert_eq!(sim.advance(0.0).steps, 0);
    }

    #[test]
    fn test_broadcast_cadence_is_lower_than_tick_rate() {
        let mut sim = Simulation::new(&config(1));
        let step = sim.step_secs();
        let due = (0..60).filter(|_| sim.advance(step).snapshot_due).count();
        assert_eq!(sim.world.tick, 60);
        assert!((19..=20).contains(&due), "due = {due}");
    }

    #[test]
    fn test_stale_input_is_dropped() {
        let mut sim = Simulation::new(&config(1));
        let id = sim.spawn_player(None, "p".into());
        assert!(sim.set_heading(id, 5, Vec2::new(3.0, 4.0)));
        assert!((sim.world.cells[&id].heading - Vec2::new(0.6, 0.8)).length() < 1e-6);

        assert!(!sim.set_heading(id, 5, Vec2::X));
        assert!(!sim.set_heading(id, 2, Vec2::X));
        assert!(!sim.set_heading(id, 6, Vec2::new(f32::NAN, 0.0)));
        assert!((sim.world.cells[&id].heading - Vec2::new(0.6, 0.8)).length() < 1e-6);
        assert_eq!(sim.world.cells[&id].last_input_seq, 5);
    }

    #[test]
    fn test_population_stays_full() {
        let mut sim = Simulation::new(&config(2));
        let cfg = config(2);
        assert_eq!(sim.world.coins.len(), cfg.coin.max_count);
        assert_eq!(sim.world.viruses.len(), cfg.virus.count);
        for i in 0..8 {
            let id = sim.spawn_player(None, format!("p{i}"));
            sim.set_heading(id, 1, Vec2::from_angle(i as f32));
        }
        for _ in 0..300 {
            sim.step();
            assert_eq!(sim.world.coins.len(), cfg.coin.max_count);
            assert_eq!(sim.world.viruses.len(), cfg.virus.count);
        }
    }

    #[test]
    fn test_same_seed_same_world() {
        let run = || {
            let mut sim = Simulation::new(&config(9));
            let a = sim.spawn_player(None, "a".into());
            let b = sim.spawn_player(None, "b".into());
            sim.set_heading(a, 1, Vec2::X);
            sim.set_heading(b, 1, Vec2::NEG_Y);
            for _ in 0..120 {
                sim.step();
            }
            sim.snapshot()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_split_pieces_merge_back_on_their_own() {
        let mut cfg = config(4);
        cfg.coin.max_count = 0;
        cfg.virus.count = 0;
        let mut sim = Simulation::new(&cfg);
        let id = sim.spawn_player(None, "p".into());
        {
            let cell = sim.world.cells.get_mut(&id).unwrap();
            cell.position = Vec2::ZERO;
            cell.set_mass(80.0);
        }
        assert!(sim.split(id, Vec2::new(100.0, 0.0)).is_some());
        assert_eq!(sim.world.cells.len(), 2);

        for _ in 0..(60 * 30) {
            sim.step();
            if sim.world.cells.len() == 1 {
                break;
            }
        }
        assert_eq!(sim.world.cells.len(), 1);
        assert!((sim.world.cells[&id].mass() - 80.0).abs() < 1e-3);
    }

    #[test]
    fn test_leaderboard_ranks_by_group_score() {
        let mut sim = Simulation::new(&config(3));
        let a = sim.spawn_player(None, "a".into());
        let b = sim.spawn_player(None, "b".into());
        sim.world.cells.get_mut(&a).unwrap().score = 1.0;
        sim.world.cells.get_mut(&b).unwrap().score = 5.0;
        let board = sim.snapshot().leaderboard;
        assert_eq!(board[0].id, b);
        assert_eq!(board[1].id, a);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_every_body_inside_after_each_step(seed in any::<u64>(), angle in 0.0f32..6.28) {
            let mut cfg = config(seed);
            cfg.world.playable_radius = 400.0;
            cfg.coin.max_count = 40;
            cfg.virus.count = 4;
            let mut sim = Simulation::new(&cfg);
            let id = sim.spawn_player(None, "p".into());
            sim.world.cells.get_mut(&id).unwrap().set_mass(90.0);
            sim.set_heading(id, 1, Vec2::from_angle(angle));
            for tick in 0..90u32 {
                if tick % 30 == 0 {
                    sim.split(id, Vec2::from_angle(angle) * 1000.0);
                }
                sim.step();
                let area = sim.world.area;
                for cell in sim.world.cells.values() {
                    prop_assert!(cell.position.length() <= area.limit_for(cell.radius()) + 1e-3);
                }
                for coin in sim.world.coins.values() {
                    prop_assert!(area.contains(coin));
                }
                for virus in sim.world.viruses.values() {
                    prop_assert!(area.contains(virus));
                }
            }
        }
    }
}
