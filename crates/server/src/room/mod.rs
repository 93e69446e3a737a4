//! Rooms.
//!
//! A [`Room`] owns one simulation and the sessions playing in it. It wires
//! client input to the simulation, turns collision events into player
//! notifications and stake settlement, and acts on anti-cheat verdicts.
//! All mutation happens on the room's own task; ledger calls are handed to
//! [`Settlement`] and their results applied at the next loop boundary.

mod runner;
mod session;
mod settlement;

pub use runner::{RoomCommand, RoomHandle, RoomRegistry, run_room_loop};
pub use session::Session;
pub use settlement::{Completion, Settlement};

use crate::anticheat::{Action, InputValidator, Verdict};
use crate::collision::{CollisionEvent, Elimination};
use crate::config::Config;
use crate::entity::SessionId;
use crate::ledger::{StakeLedger, StakeTransfer};
use crate::sim::{Simulation, WorldSnapshot};
use glam::Vec2;
use protocol::packets::StakeStatus;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Room lifecycle failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room limit of {0} reached")]
    LimitReached(usize),
    #[error("room {0} is closed")]
    Closed(String),
}

/// A message for one session, or for everyone in the room.
#[derive(Debug, Clone)]
pub struct TargetedMessage {
    /// Target session; `None` reaches every session.
    pub target: Option<SessionId>,
    pub message: TargetedMessageType,
}

impl TargetedMessage {
    #[inline]
    pub fn is_for(&self, session: SessionId) -> bool {
        self.target.is_none_or(|t| t == session)
    }
}

/// Types of targeted messages.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetedMessageType {
    Joined {
        session: SessionId,
        position: Vec2,
        mass: f32,
        world_size: f32,
        playable_radius: f32,
        declared_stake: u64,
        stake_pending: bool,
    },
    Eliminated {
        final_score: f32,
        final_mass: f32,
        eliminator: String,
    },
    /// Room-wide notice of a settled elimination.
    StakeTransfer {
        winner: String,
        loser: String,
        amount: u64,
    },
    StakeCredit {
        amount: u64,
        from: String,
    },
    StakeDebit {
        amount: u64,
        to: String,
    },
    StakeStatus {
        status: StakeStatus,
        amount: u64,
    },
    Kicked {
        reason: String,
    },
    /// The session is no longer in the room; close the connection.
    Disconnect,
}

/// A request to join a room.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub display_name: String,
    pub user_id: Option<String>,
    /// Declared stake; locked only for authenticated joins.
    pub stake: u64,
    pub is_authenticated: bool,
}

/// The spawned player of an accepted join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinAccepted {
    pub session: SessionId,
    pub position: Vec2,
    pub mass: f32,
    /// A reserve is in flight; the stake is not locked yet.
    pub stake_pending: bool,
}

/// One match: a simulation and its sessions.
pub struct Room {
    name: String,
    sim: Simulation,
    sessions: HashMap<SessionId, Session>,
    settlement: Settlement,
    validator: Box<dyn InputValidator>,
    targeted_tx: broadcast::Sender<TargetedMessage>,
    /// Seconds between anti-cheat samples.
    sample_interval: f64,
    next_sample: f64,
}

impl Room {
    pub fn new(
        name: &str,
        config: &Config,
        ledger: Arc<dyn StakeLedger>,
        validator: Box<dyn InputValidator>,
        targeted_tx: broadcast::Sender<TargetedMessage>,
    ) -> Self {
        let sim = Simulation::new(config);
        info!(
            "Room {} created: {} coins, {} viruses",
            name,
            sim.world.coins.len(),
            sim.world.viruses.len()
        );
        Self {
            name: name.to_string(),
            sim,
            sessions: HashMap::new(),
            settlement: Settlement::new(ledger, name),
            validator,
            targeted_tx,
            sample_interval: config.anticheat.sample_interval_ms as f64 / 1000.0,
            next_sample: 0.0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    fn send(&self, target: Option<SessionId>, message: TargetedMessageType) {
        // Err only means nobody is subscribed.
        let _ = self.targeted_tx.send(TargetedMessage { target, message });
    }

    /// Spawn a player. A declared stake is reserved in the background when
    /// the join is authenticated; the player is unstaked until it lands.
    pub fn join(&mut self, request: JoinRequest) -> JoinAccepted {
        let user_id = request.user_id.filter(|_| request.is_authenticated);
        let session = self
            .sim
            .spawn_player(user_id.clone(), request.display_name.clone());
        let (position, mass) = self
            .sim
            .world
            .controller(session)
            .map_or((Vec2::ZERO, 0.0), |c| (c.position, c.mass()));

        let stake_pending = match &user_id {
            Some(user) if request.stake > 0 => {
                self.settlement.reserve(session, user.clone(), request.stake);
                true
            }
            _ => false,
        };

        let mut entry = Session::new(
            session,
            request.display_name,
            user_id,
            request.stake,
            self.sim.world.time(),
        );
        entry.reserve_pending = stake_pending;
        info!(
            "{} joined room {} as session {} (declared stake {}, {})",
            entry.name,
            self.name,
            session,
            request.stake,
            if stake_pending { "reserving" } else { "unstaked" }
        );
        self.sessions.insert(session, entry);

        self.send(
            Some(session),
            TargetedMessageType::Joined {
                session,
                position,
                mass,
                world_size: self.sim.world.size,
                playable_radius: self.sim.world.area.radius,
                declared_stake: request.stake,
                stake_pending,
            },
        );
        if request.stake > 0 && !stake_pending {
            self.send(
                Some(session),
                TargetedMessageType::StakeStatus {
                    status: StakeStatus::Unstaked,
                    amount: request.stake,
                },
            );
        }

        JoinAccepted {
            session,
            position,
            mass,
            stake_pending,
        }
    }

    /// Remove a session and its cells, refunding a live controller's stake.
    pub fn leave(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.remove(&session) else {
            return;
        };
        self.validator.forget(session);

        let stake = self
            .sim
            .remove_player(session)
            .iter()
            .find(|c| c.is_controller() && c.alive)
            .map_or(0, |c| c.stake);
        if stake > 0 {
            match entry.user_id {
                Some(user) => self.settlement.refund(session, user, stake),
                None => warn!("Session {} held stake {} without identity", session, stake),
            }
        }
        info!(
            "{} left room {} (session {}, played {:.1}s, refund {})",
            entry.name,
            self.name,
            session,
            self.sim.world.time() - entry.joined_at,
            stake
        );
    }

    /// Apply a steering input; stale or malformed inputs are dropped.
    pub fn input(&mut self, session: SessionId, sequence: u32, direction: Vec2) {
        let applied = self.sim.set_heading(session, sequence, direction);
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        if !applied {
            entry.inputs_dropped += 1;
            debug!("Dropped input {} from session {}", sequence, session);
            return;
        }
        entry.inputs_applied += 1;

        let heading = self
            .sim
            .world
            .controller(session)
            .map_or(Vec2::ZERO, |c| c.heading);
        let verdict = self
            .validator
            .check(session, &Action::Direction(heading), self.sim.world.time());
        self.act_on(session, verdict);
    }

    /// Split toward `target`; ignored when a precondition fails.
    pub fn split(&mut self, session: SessionId, target: Vec2) {
        if !self.sessions.contains_key(&session) {
            return;
        }
        if self.sim.split(session, target).is_none() {
            debug!("Split from session {} ignored", session);
        }
    }

    /// Apply finished ledger work, then advance the simulation by
    /// `elapsed` seconds. Returns a snapshot when one is due.
    ///
    /// An empty room does not simulate.
    pub fn advance(&mut self, elapsed: f64) -> Option<WorldSnapshot> {
        self.apply_completions();
        if self.sessions.is_empty() {
            return None;
        }

        let report = self.sim.advance(elapsed);
        if report.dropped > 0.0 {
            debug!(
                "Room {} dropped {:.1}ms of backlog",
                self.name,
                report.dropped * 1000.0
            );
        }
        for event in self.sim.drain_events() {
            self.handle_event(event);
        }
        self.sample_controllers();

        report.snapshot_due.then(|| self.sim.snapshot())
    }

    fn handle_event(&mut self, event: CollisionEvent) {
        let now = self.sim.world.time();
        match event {
            CollisionEvent::CoinPickup { owner, .. } => {
                if self.sessions.contains_key(&owner) {
                    let verdict = self.validator.check(owner, &Action::Pickup, now);
                    self.act_on(owner, verdict);
                }
            }
            CollisionEvent::HazardHit {
                cell,
                mass_before,
                mass_after,
                ..
            } => {
                debug!("Cell {} hit a virus: {:.1} -> {:.1}", cell, mass_before, mass_after);
            }
            CollisionEvent::HazardPopped { cell, virus, .. } => {
                debug!("Cell {} popped virus {}", cell, virus);
            }
            CollisionEvent::PieceConsumed {
                winner,
                piece,
                piece_owner,
                ..
            } => {
                debug!("Cell {} ate piece {} of session {}", winner, piece, piece_owner);
            }
            CollisionEvent::Elimination(elimination) => {
                let winner = elimination.winner_owner;
                self.eliminate(elimination);
                if self.sessions.contains_key(&winner) {
                    let verdict = self.validator.check(winner, &Action::Elimination, now);
                    self.act_on(winner, verdict);
                }
            }
        }
    }

    /// Notify and remove an eliminated player, then settle its stake.
    ///
    /// The stake was already taken out of the world when the collision was
    /// resolved; settlement only moves it in the ledger.
    fn eliminate(&mut self, e: Elimination) {
        info!(
            "{} eliminated {} in room {} (stake {})",
            e.winner_name, e.loser_name, self.name, e.stake
        );
        self.send(
            Some(e.loser_owner),
            TargetedMessageType::Eliminated {
                final_score: e.final_score,
                final_mass: e.final_mass,
                eliminator: e.winner_name.clone(),
            },
        );
        self.send(Some(e.loser_owner), TargetedMessageType::Disconnect);
        self.sessions.remove(&e.loser_owner);
        self.validator.forget(e.loser_owner);

        if e.stake == 0 {
            return;
        }
        match (e.winner_user_id, e.loser_user_id) {
            (Some(winner), Some(loser)) => self.settlement.transfer(
                e.winner_owner,
                e.loser_owner,
                StakeTransfer {
                    winner,
                    loser,
                    amount: e.stake,
                    winner_name: e.winner_name,
                    loser_name: e.loser_name,
                },
            ),
            (None, Some(loser)) => {
                info!(
                    "Winner {} has no ledger identity, refunding {} to {}",
                    e.winner_name, e.stake, loser
                );
                self.settlement.refund(e.loser_owner, loser, e.stake);
            }
            (_, None) => warn!(
                "Eliminated session {} held stake {} without identity",
                e.loser_owner, e.stake
            ),
        }
    }

    /// Remove a player for cheating; the normal leave path refunds.
    pub fn kick(&mut self, session: SessionId, reason: &str) {
        if !self.sessions.contains_key(&session) {
            return;
        }
        warn!("Kicking session {} from room {}: {}", session, self.name, reason);
        self.send(
            Some(session),
            TargetedMessageType::Kicked {
                reason: reason.to_string(),
            },
        );
        self.send(Some(session), TargetedMessageType::Disconnect);
        self.leave(session);
    }

    fn act_on(&mut self, session: SessionId, verdict: Verdict) {
        match verdict {
            Verdict::Approve => {}
            Verdict::Penalize { suspicion } => {
                debug!("Session {} suspicion now {}", session, suspicion);
            }
            Verdict::Kick => self.kick(session, "suspicious activity"),
        }
    }

    fn sample_controllers(&mut self) {
        let now = self.sim.world.time();
        if now < self.next_sample {
            return;
        }
        self.next_sample = now + self.sample_interval;

        let mut samples: Vec<(SessionId, Vec2, f32)> = self
            .sessions
            .keys()
            .filter_map(|&id| {
                self.sim
                    .world
                    .controller(id)
                    .map(|c| (id, c.position, self.sim.world.group_mass(id)))
            })
            .collect();
        samples.sort_by_key(|s| s.0);

        for (session, position, mass) in samples {
            let verdict = self
                .validator
                .check(session, &Action::Sample { position, mass }, now);
            self.act_on(session, verdict);
        }
    }

    fn apply_completions(&mut self) {
        for completion in self.settlement.completed() {
            self.apply_completion(completion);
        }
    }

    fn apply_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Reserved {
                session,
                user,
                amount,
                result: Ok(()),
            } => {
                let live = self.sessions.contains_key(&session);
                if let Some(entry) = self.sessions.get_mut(&session) {
                    entry.reserve_pending = false;
                }
                let locked = match self.sim.world.controller_mut(session) {
                    Some(controller) if controller.alive && live => {
                        controller.stake = amount;
                        true
                    }
                    _ => false,
                };
                if locked {
                    info!("Locked stake {} for {} (session {})", amount, user, session);
                    self.send(
                        Some(session),
                        TargetedMessageType::StakeStatus {
                            status: StakeStatus::Locked,
                            amount,
                        },
                    );
                } else {
                    info!(
                        "Reserve for {} landed after session {} ended, refunding {}",
                        user, session, amount
                    );
                    self.settlement.refund(session, user, amount);
                }
            }
            Completion::Reserved {
                session,
                user,
                amount,
                result: Err(e),
            } => {
                warn!(
                    "Reserve of {} for {} failed, playing unstaked: {}",
                    amount, user, e
                );
                if let Some(entry) = self.sessions.get_mut(&session) {
                    entry.reserve_pending = false;
                }
                self.send(
                    Some(session),
                    TargetedMessageType::StakeStatus {
                        status: StakeStatus::Unstaked,
                        amount,
                    },
                );
            }
            Completion::Refunded {
                session,
                user,
                amount,
                result: Ok(()),
            } => {
                info!("Refunded {} to {}", amount, user);
                self.send(
                    Some(session),
                    TargetedMessageType::StakeStatus {
                        status: StakeStatus::Refunded,
                        amount,
                    },
                );
            }
            Completion::Refunded {
                user,
                amount,
                result: Err(e),
                ..
            } => {
                warn!("Refund of {} to {} failed: {}", amount, user, e);
            }
            Completion::Transferred {
                winner,
                loser,
                transfer,
                result: Ok(()),
            } => {
                if let Some(controller) = self.sim.world.controller_mut(winner) {
                    controller.wallet_earnings += transfer.amount;
                }
                info!(
                    "Transferred {} from {} to {}",
                    transfer.amount, transfer.loser, transfer.winner
                );
                self.send(
                    None,
                    TargetedMessageType::StakeTransfer {
                        winner: transfer.winner_name.clone(),
                        loser: transfer.loser_name.clone(),
                        amount: transfer.amount,
                    },
                );
                self.send(
                    Some(winner),
                    TargetedMessageType::StakeCredit {
                        amount: transfer.amount,
                        from: transfer.loser_name.clone(),
                    },
                );
                self.send(
                    Some(loser),
                    TargetedMessageType::StakeDebit {
                        amount: transfer.amount,
                        to: transfer.winner_name,
                    },
                );
            }
            Completion::Transferred {
                transfer,
                result: Err(e),
                ..
            } => {
                error!(
                    "Stake transfer of {} from {} to {} failed: {}",
                    transfer.amount, transfer.loser, transfer.winner, e
                );
            }
        }
    }

    /// Refund every live staked controller and wait for all ledger work.
    pub async fn close(mut self) {
        let mut staked: Vec<(SessionId, String, u64)> = Vec::new();
        for (&id, entry) in &self.sessions {
            let (Some(user), Some(controller)) = (&entry.user_id, self.sim.world.controller_mut(id)) else {
                continue;
            };
            if controller.alive && controller.stake > 0 {
                staked.push((id, user.clone(), std::mem::take(&mut controller.stake)));
            }
        }
        for (session, user, amount) in staked {
            self.settlement.refund(session, user, amount);
        }
        self.sessions.clear();
        debug!(
            "Room {} closing with {} ledger calls in flight",
            self.name,
            self.settlement.in_flight()
        );

        loop {
            let done = self.settlement.drain().await;
            if done.is_empty() {
                break;
            }
            for completion in done {
                self.apply_completion(completion);
            }
        }
        info!("Room {} closed", self.name);
    }
}
