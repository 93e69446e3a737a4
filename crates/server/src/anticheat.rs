//! Input validation and anti-cheat gate.
//!
//! The room reports player actions to an [`InputValidator`] and acts on the
//! returned [`Verdict`]. [`HeuristicGate`] keeps a suspicion counter per
//! session and checks movement plausibility, mass-gain rate and action
//! frequency over sliding one-second windows.

use crate::config::AntiCheatConfig;
use crate::entity::SessionId;
use glam::Vec2;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Window for frequency caps, in seconds.
const WINDOW: f64 = 1.0;

/// Directions closer than this (cosine) count as the same heading.
const SAME_HEADING_COS: f32 = 0.999;

/// A player action offered for validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// A steering input was applied.
    Direction(Vec2),
    /// Periodic controller position and group mass.
    Sample { position: Vec2, mass: f32 },
    Pickup,
    Elimination,
}

/// Outcome of validating an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    /// The action was implausible; `suspicion` is the new running total.
    Penalize { suspicion: u32 },
    /// Suspicion crossed the threshold; the player must be removed.
    Kick,
}

/// Validates player actions.
pub trait InputValidator: Send {
    /// Judge one action taken at simulation time `now` (seconds).
    fn check(&mut self, session: SessionId, action: &Action, now: f64) -> Verdict;

    /// Drop all state kept for a session.
    fn forget(&mut self, session: SessionId);
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproveAll;

impl InputValidator for ApproveAll {
    fn check(&mut self, _session: SessionId, _action: &Action, _now: f64) -> Verdict {
        Verdict::Approve
    }

    fn forget(&mut self, _session: SessionId) {}
}

#[derive(Debug, Default)]
struct Track {
    suspicion: u32,
    last_sample: Option<(f64, Vec2, f32)>,
    last_direction: Option<Vec2>,
    direction_changes: VecDeque<f64>,
    pickups: VecDeque<f64>,
    eliminations: VecDeque<f64>,
}

/// Record `now` in a sliding window and report whether it exceeds `cap`.
fn over_rate(window: &mut VecDeque<f64>, now: f64, cap: u32) -> bool {
    while window.front().is_some_and(|&t| now - t >= WINDOW) {
        window.pop_front();
    }
    window.push_back(now);
    window.len() > cap as usize
}

/// Heuristic validator driven by [`AntiCheatConfig`].
#[derive(Debug)]
pub struct HeuristicGate {
    config: AntiCheatConfig,
    /// Fastest legal displacement in world units per second.
    max_displacement: f32,
    tracks: HashMap<SessionId, Track>,
}

impl HeuristicGate {
    /// `max_displacement` is the fastest a controller can legally travel,
    /// velocity and ejection momentum combined, per second.
    pub fn new(config: &AntiCheatConfig, max_displacement: f32) -> Self {
        Self {
            config: config.clone(),
            max_displacement,
            tracks: HashMap::new(),
        }
    }

    pub fn suspicion(&self, session: SessionId) -> u32 {
        self.tracks.get(&session).map_or(0, |t| t.suspicion)
    }

    fn penalty(&self, track: &mut Track, action: &Action, now: f64) -> u32 {
        let c = &self.config;
        match *action {
            Action::Direction(direction) => {
                let changed = track
                    .last_direction
                    .is_none_or(|last| last.dot(direction) < SAME_HEADING_COS);
                track.last_direction = Some(direction);
                if changed && over_rate(&mut track.direction_changes, now, c.max_direction_changes_per_sec) {
                    c.frequency_penalty
                } else {
                    0
                }
            }
            Action::Pickup => {
                if over_rate(&mut track.pickups, now, c.max_pickups_per_sec) {
                    c.frequency_penalty
                } else {
                    0
                }
            }
            Action::Elimination => {
                if over_rate(&mut track.eliminations, now, c.max_eliminations_per_sec) {
                    c.frequency_penalty
                } else {
                    0
                }
            }
            Action::Sample { position, mass } => {
                let previous = track.last_sample.replace((now, position, mass));
                let Some((then, last_position, last_mass)) = previous else {
                    return 0;
                };
                let elapsed = (now - then) as f32;
                if elapsed <= 0.0 {
                    return 0;
                }
                let mut penalty = 0;
                let allowed = self.max_displacement * elapsed * c.movement_tolerance;
                if position.distance(last_position) > allowed {
                    penalty += c.movement_penalty;
                }
                if mass - last_mass > c.max_mass_gain_per_sec * elapsed {
                    penalty += c.mass_penalty;
                }
                penalty
            }
        }
    }
}

impl InputValidator for HeuristicGate {
    fn check(&mut self, session: SessionId, action: &Action, now: f64) -> Verdict {
        let mut track = self.tracks.remove(&session).unwrap_or_default();
        let penalty = self.penalty(&mut track, action, now);
        let verdict = if penalty == 0 {
            Verdict::Approve
        } else {
            track.suspicion = track.suspicion.saturating_add(penalty);
            debug!(
                "Session {} penalized {} for {:?} (suspicion {})",
                session, penalty, action, track.suspicion
            );
            if track.suspicion >= self.config.suspicion_threshold {
                Verdict::Kick
            } else {
                Verdict::Penalize {
                    suspicion: track.suspicion,
                }
            }
        };
        self.tracks.insert(session, track);
        verdict
    }

    fn forget(&mut self, session: SessionId) {
        self.tracks.remove(&session);
    }
}
