//! Collision detection and resolution.
//!
//! This module handles, in this order:
//! - Coin pickup and hazard interaction, per cell in id order
//! - Player-vs-player consumption, over sorted cell pairs
//!
//! Candidates come from the world's spatial grids and are visited in id
//! order, so the outcome matches a full pairwise scan.
//!
//! Eating a split piece only removes that piece. Eating a controller
//! eliminates its whole ownership group and takes its stake out of the
//! world synchronously, leaving settlement to the caller.

use crate::config::{CoinConfig, EliminationConfig, PlayerConfig, VirusConfig};
use crate::entity::{Body, CellId, SessionId};
use crate::world::World;
use fixedbitset::FixedBitSet;
use glam::Vec2;
use rand::Rng;

/// Result of checking overlap between two circles.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResult {
    /// Combined radius.
    pub r: f32,
    /// Center distance.
    pub d: f32,
}

impl CollisionResult {
    /// Strict overlap; touching circles do not collide.
    #[inline]
    pub fn is_colliding(&self) -> bool {
        self.d < self.r
    }
}

/// Check overlap between two circles.
#[inline]
pub fn check_collision(a_pos: Vec2, a_radius: f32, b_pos: Vec2, b_radius: f32) -> CollisionResult {
    CollisionResult {
        r: a_radius + b_radius,
        d: a_pos.distance(b_pos),
    }
}

/// Consumption and damage constants.
#[derive(Debug, Clone, Copy)]
pub struct CollisionRules {
    pub start_mass: f32,
    pub coin_value: f32,
    pub coin_radius: f32,
    pub virus_min_radius: f32,
    pub virus_max_radius: f32,
    pub damage_factor: f32,
    pub reward_mass: f32,
    /// Seconds of hazard immunity after a damaging hit.
    pub hit_cooldown: f64,
    pub mass_ratio: f32,
    pub mass_gain: f32,
    pub score_gain: f32,
}

impl CollisionRules {
    pub fn new(
        player: &PlayerConfig,
        coin: &CoinConfig,
        virus: &VirusConfig,
        elimination: &EliminationConfig,
    ) -> Self {
        Self {
            start_mass: player.start_mass,
            coin_value: coin.value,
            coin_radius: coin.radius,
            virus_min_radius: virus.min_radius,
            virus_max_radius: virus.max_radius,
            damage_factor: virus.damage_factor,
            reward_mass: virus.reward_mass,
            hit_cooldown: virus.hit_cooldown_ms as f64 / 1000.0,
            mass_ratio: elimination.mass_ratio,
            mass_gain: elimination.mass_gain,
            score_gain: elimination.score_gain,
        }
    }

    /// Whether a cell of `winner` mass may absorb one of `loser` mass.
    #[inline]
    pub fn can_eat(&self, winner: f32, loser: f32) -> bool {
        winner > loser * self.mass_ratio
    }

    /// Mass after one damaging hazard hit.
    ///
    /// A controller at or above spawn mass is floored at spawn mass; split
    /// pieces and already-small controllers are not.
    pub fn damaged_mass(&self, mass: f32, is_split_piece: bool) -> f32 {
        let damaged = mass * self.damage_factor;
        if !is_split_piece && mass >= self.start_mass {
            damaged.max(self.start_mass)
        } else {
            damaged
        }
    }
}

/// A controller eliminated by another player.
#[derive(Debug, Clone)]
pub struct Elimination {
    /// Cell that did the eating (controller or piece).
    pub winner: CellId,
    pub winner_owner: SessionId,
    pub winner_user_id: Option<String>,
    pub winner_name: String,
    pub loser_owner: SessionId,
    pub loser_user_id: Option<String>,
    pub loser_name: String,
    /// Stake taken from the loser's controller; already zero in the world.
    pub stake: u64,
    /// Group score and mass at the moment of elimination.
    pub final_score: f32,
    pub final_mass: f32,
    /// Every cell removed with the group.
    pub removed: Vec<CellId>,
}

/// Something that happened while resolving collisions.
#[derive(Debug, Clone)]
pub enum CollisionEvent {
    CoinPickup {
        cell: CellId,
        owner: SessionId,
        coin: u32,
        replacement: u32,
    },
    HazardHit {
        cell: CellId,
        owner: SessionId,
        virus: u32,
        mass_before: f32,
        mass_after: f32,
    },
    HazardPopped {
        cell: CellId,
        owner: SessionId,
        virus: u32,
        replacement: u32,
    },
    PieceConsumed {
        winner: CellId,
        winner_owner: SessionId,
        piece: CellId,
        piece_owner: SessionId,
    },
    Elimination(Elimination),
}

/// Resolve all collisions for one tick, appending to `events`.
pub fn resolve<R: Rng + ?Sized>(
    world: &mut World,
    rules: &CollisionRules,
    rng: &mut R,
    events: &mut Vec<CollisionEvent>,
) {
    let ids: Vec<CellId> = world
        .cells
        .values()
        .filter(|c| c.alive)
        .map(|c| c.id)
        .collect();

    world.rebuild_index();
    for &id in &ids {
        resolve_coins(world, rules, rng, id, events);
        resolve_hazards(world, rules, rng, id, events);
        world.reindex_cell(id);
    }
    resolve_players(world, rules, &ids, events);

    let area = world.area;
    for cell in world.cells.values_mut() {
        area.clamp(cell, true);
    }
}

fn resolve_coins<R: Rng + ?Sized>(
    world: &mut World,
    rules: &CollisionRules,
    rng: &mut R,
    id: CellId,
    events: &mut Vec<CollisionEvent>,
) {
    let Some(cell) = world.cells.get(&id) else {
        return;
    };
    let (position, radius, owner) = (cell.position, cell.radius(), cell.owner);
    let touched: Vec<u32> = world
        .coins_near(position, radius)
        .into_iter()
        .filter(|coin_id| {
            world
                .coins
                .get(coin_id)
                .is_some_and(|coin| check_collision(position, radius, coin.position, coin.radius).is_colliding())
        })
        .collect();

    for coin_id in touched {
        let Some(coin) = world.remove_coin(coin_id) else {
            continue;
        };
        if let Some(cell) = world.cells.get_mut(&id) {
            cell.add_mass(coin.value);
            cell.score += coin.value;
        }
        let replacement = world.spawn_coin(rng, rules.coin_value, rules.coin_radius);
        events.push(CollisionEvent::CoinPickup {
            cell: id,
            owner,
            coin: coin_id,
            replacement,
        });
    }
}

fn resolve_hazards<R: Rng + ?Sized>(
    world: &mut World,
    rules: &CollisionRules,
    rng: &mut R,
    id: CellId,
    events: &mut Vec<CollisionEvent>,
) {
    let now = world.time();
    let Some(cell) = world.cells.get(&id) else {
        return;
    };
    let (position, radius, owner) = (cell.position, cell.radius(), cell.owner);
    let touched: Vec<u32> = world
        .viruses_near(position, radius)
        .into_iter()
        .filter(|virus_id| {
            world
                .viruses
                .get(virus_id)
                .is_some_and(|v| check_collision(position, radius, v.position, v.radius).is_colliding())
        })
        .collect();

    for virus_id in touched {
        let Some(cell) = world.cells.get(&id) else {
            return;
        };
        let Some(virus) = world.viruses.get(&virus_id) else {
            continue;
        };
        let popped = virus.is_popped_by(cell.mass());
        let immune = now < cell.hazard_immune_until;

        if popped {
            world.remove_virus(virus_id);
            if let Some(cell) = world.cells.get_mut(&id) {
                cell.add_mass(rules.reward_mass);
                cell.score += rules.reward_mass;
            }
            let replacement =
                world.spawn_virus(rng, rules.virus_min_radius, rules.virus_max_radius);
            events.push(CollisionEvent::HazardPopped {
                cell: id,
                owner,
                virus: virus_id,
                replacement,
            });
        } else if !immune {
            let Some(cell) = world.cells.get_mut(&id) else {
                return;
            };
            let mass_before = cell.mass();
            let mass_after = rules.damaged_mass(mass_before, cell.is_split_piece);
            cell.set_mass(mass_after);
            cell.hazard_immune_until = now + rules.hit_cooldown;
            events.push(CollisionEvent::HazardHit {
                cell: id,
                owner,
                virus: virus_id,
                mass_before,
                mass_after,
            });
        }
    }
}

fn resolve_players(
    world: &mut World,
    rules: &CollisionRules,
    ids: &[CellId],
    events: &mut Vec<CollisionEvent>,
) {
    let mut removed = FixedBitSet::with_capacity(ids.len());

    for i in 0..ids.len() {
        // Highest partner id already visited for this cell.
        let mut after = ids[i];
        'scan: loop {
            if removed.contains(i) {
                break;
            }
            let Some(a) = world.cells.get(&ids[i]) else {
                break;
            };
            let candidates = world.cells_near(a.position, a.radius());
            let start = after;

            for other in candidates.into_iter().filter(|&c| c > start) {
                after = other;
                let Ok(j) = ids.binary_search(&other) else {
                    continue;
                };
                if removed.contains(j) {
                    continue;
                }
                let (Some(a), Some(b)) = (world.cells.get(&ids[i]), world.cells.get(&other)) else {
                    continue;
                };
                if a.owner == b.owner {
                    continue;
                }
                if !check_collision(a.position, a.radius(), b.position, b.radius()).is_colliding() {
                    continue;
                }

                let (winner, loser) = if rules.can_eat(a.mass(), b.mass()) {
                    (ids[i], other)
                } else if rules.can_eat(b.mass(), a.mass()) {
                    (other, ids[i])
                } else {
                    continue;
                };

                let event = consume(world, rules, winner, loser);
                let gone = match &event {
                    CollisionEvent::Elimination(e) => e.removed.clone(),
                    _ => vec![loser],
                };
                for cell_id in gone {
                    if let Ok(index) = ids.binary_search(&cell_id) {
                        removed.insert(index);
                    }
                }
                events.push(event);

                // The winner grew; query again with its new radius.
                world.reindex_cell(winner);
                continue 'scan;
            }
            break;
        }
    }
}

/// Let `winner` eat `loser`, removing the loser's whole group when the
/// loser is a controller.
fn consume(world: &mut World, rules: &CollisionRules, winner: CellId, loser: CellId) -> CollisionEvent {
    let (loser_mass, loser_score, loser_owner, loser_is_piece) = match world.cells.get(&loser) {
        Some(c) => (c.mass(), c.score, c.owner, c.is_split_piece),
        None => (0.0, 0.0, loser, true),
    };

    let winner_owner = match world.cells.get_mut(&winner) {
        Some(cell) => {
            cell.add_mass(loser_mass * rules.mass_gain);
            cell.score += loser_score * rules.score_gain;
            cell.owner
        }
        None => winner,
    };

    if loser_is_piece {
        world.remove_cell(loser);
        return CollisionEvent::PieceConsumed {
            winner,
            winner_owner,
            piece: loser,
            piece_owner: loser_owner,
        };
    }

    let final_mass = world.group_mass(loser_owner);
    let final_score: f32 = world
        .cells
        .values()
        .filter(|c| c.owner == loser_owner && c.alive)
        .map(|c| c.score)
        .sum();

    let stake = match world.controller_mut(loser_owner) {
        Some(controller) => {
            controller.alive = false;
            std::mem::take(&mut controller.stake)
        }
        None => 0,
    };

    let removed_cells = world.remove_group(loser_owner);
    let (loser_user_id, loser_name) = removed_cells
        .iter()
        .find(|c| c.is_controller())
        .map(|c| (c.user_id.clone(), c.name.clone()))
        .unwrap_or_default();

    let (winner_user_id, winner_name) = world
        .controller(winner_owner)
        .or_else(|| world.cells.get(&winner))
        .map(|c| (c.user_id.clone(), c.name.clone()))
        .unwrap_or_default();

    CollisionEvent::Elimination(Elimination {
        winner,
        winner_owner,
        winner_user_id,
        winner_name,
        loser_owner,
        loser_user_id,
        loser_name,
        stake,
        final_score,
        final_mass,
        removed: removed_cells.iter().map(|c| c.id).collect(),
    })
}
