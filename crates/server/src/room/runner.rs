//! Room tasks.
//!
//! Every room runs on its own tokio task. Connections talk to it through a
//! [`RoomHandle`]: commands go in over an mpsc channel, snapshots and
//! targeted messages come back over broadcast channels.

use super::{JoinAccepted, JoinRequest, Room, RoomError, TargetedMessage};
use crate::anticheat::HeuristicGate;
use crate::config::Config;
use crate::entity::SessionId;
use crate::ledger::StakeLedger;
use crate::sim::WorldSnapshot;
use glam::Vec2;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 1024;
const WORLD_BUFFER: usize = 16;
const TARGETED_BUFFER: usize = 256;

/// Ticks between periodic timing reports.
const REPORT_EVERY: u64 = 600;

/// Commands accepted by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<JoinAccepted>,
    },
    Input {
        session: SessionId,
        sequence: u32,
        direction: Vec2,
    },
    Split {
        session: SessionId,
        target: Vec2,
    },
    Leave {
        session: SessionId,
    },
    Shutdown,
}

/// Cheap handle to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    name: Arc<str>,
    commands: mpsc::Sender<RoomCommand>,
    world_tx: broadcast::Sender<Arc<WorldSnapshot>>,
    targeted_tx: broadcast::Sender<TargetedMessage>,
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the room and wait for the spawned player.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinAccepted, RoomError> {
        let (reply, accepted) = oneshot::channel();
        self.send(RoomCommand::Join { request, reply }).await?;
        accepted.await.map_err(|_| self.closed())
    }

    pub async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    pub fn subscribe_world(&self) -> broadcast::Receiver<Arc<WorldSnapshot>> {
        self.world_tx.subscribe()
    }

    pub fn subscribe_targeted(&self) -> broadcast::Receiver<TargetedMessage> {
        self.targeted_tx.subscribe()
    }

    fn closed(&self) -> RoomError {
        RoomError::Closed(self.name.to_string())
    }
}

/// Rooms by name, created on first join.
pub struct RoomRegistry {
    config: Arc<Config>,
    ledger: Arc<dyn StakeLedger>,
    rooms: Mutex<HashMap<String, (RoomHandle, JoinHandle<()>)>>,
}

impl RoomRegistry {
    pub fn new(config: Arc<Config>, ledger: Arc<dyn StakeLedger>) -> Self {
        Self {
            config,
            ledger,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the named room, starting it if needed.
    pub async fn get_or_create(&self, name: &str) -> Result<RoomHandle, RoomError> {
        let mut rooms = self.rooms.lock().await;
        if let Some((handle, task)) = rooms.get(name) {
            if !task.is_finished() {
                return Ok(handle.clone());
            }
            warn!("Room {} task ended, restarting", name);
            rooms.remove(name);
        }
        if rooms.len() >= self.config.server.max_rooms {
            return Err(RoomError::LimitReached(self.config.server.max_rooms));
        }

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (world_tx, _) = broadcast::channel(WORLD_BUFFER);
        let (targeted_tx, _) = broadcast::channel(TARGETED_BUFFER);

        // Fastest legal controller travel: steering plus a fresh split impulse.
        let max_displacement = self.config.player.max_speed * self.config.physics.movement_scale
            + self.config.split.impulse;
        let room = Room::new(
            name,
            &self.config,
            Arc::clone(&self.ledger),
            Box::new(HeuristicGate::new(&self.config.anticheat, max_displacement)),
            targeted_tx.clone(),
        );

        let handle = RoomHandle {
            name: Arc::from(name),
            commands,
            world_tx: world_tx.clone(),
            targeted_tx,
        };
        let task = tokio::spawn(run_room_loop(room, command_rx, world_tx));
        rooms.insert(name.to_string(), (handle.clone(), task));
        Ok(handle)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Stop every room, waiting for their stake refunds to settle.
    pub async fn shutdown(&self) {
        let rooms: Vec<_> = self.rooms.lock().await.drain().collect();
        for (name, (handle, task)) in rooms {
            let _ = handle.send(RoomCommand::Shutdown).await;
            if let Err(e) = task.await {
                warn!("Room {} task failed: {}", name, e);
            }
        }
    }
}

fn handle_command(room: &mut Room, command: RoomCommand) {
    match command {
        RoomCommand::Join { request, reply } => {
            let accepted = room.join(request);
            if reply.send(accepted).is_err() {
                // Connection went away while joining.
                room.leave(accepted.session);
            }
        }
        RoomCommand::Input {
            session,
            sequence,
            direction,
        } => room.input(session, sequence, direction),
        RoomCommand::Split { session, target } => room.split(session, target),
        RoomCommand::Leave { session } => room.leave(session),
        RoomCommand::Shutdown => {}
    }
}

/// Drive one room until shut down or every handle is dropped.
pub async fn run_room_loop(
    mut room: Room,
    mut commands: mpsc::Receiver<RoomCommand>,
    world_tx: broadcast::Sender<Arc<WorldSnapshot>>,
) {
    let step = Duration::from_secs_f64(room.simulation().step_secs());
    let mut ticker = interval_at(Instant::now() + step, step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let budget_ms = step.as_secs_f64() * 1000.0 * 0.9;
    let mut last = Instant::now();
    let mut ticks = 0u64;
    let mut time_avg = 0.0f64;
    info!("Room {} running at {:?} per step", room.name(), step);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RoomCommand::Shutdown) | None => break,
                Some(command) => handle_command(&mut room, command),
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                let tick_start = std::time::Instant::now();
                let snapshot = room.advance(elapsed);
                let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
                time_avg = time_avg * 0.5 + tick_ms * 0.5;

                if tick_ms > budget_ms {
                    let counts = room.simulation().world.counts();
                    warn!(
                        "Slow tick #{} in room {}: {:.3}ms (budget: {:.1}ms) - {} players, {} cells",
                        room.simulation().world.tick,
                        room.name(),
                        tick_ms,
                        budget_ms,
                        counts.controllers,
                        counts.cells
                    );
                }

                ticks += 1;
                if ticks % REPORT_EVERY == 0 && room.session_count() > 0 {
                    let counts = room.simulation().world.counts();
                    debug!(
                        "Room {}: avg tick {:.3}ms, {} sessions, {} cells, {} coins, {} viruses",
                        room.name(),
                        time_avg,
                        room.session_count(),
                        counts.cells,
                        counts.coins,
                        counts.viruses
                    );
                }

                if let Some(snapshot) = snapshot {
                    let _ = world_tx.send(Arc::new(snapshot));
                }
            }
        }
    }

    room.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryLedger, RecordingLedger};
    use crate::room::TargetedMessageType;
    use tokio::time::timeout;

    fn config(max_rooms: usize) -> Arc<Config> {
        let mut config = Config::default();
        config.simulation.seed = Some(5);
        config.server.max_rooms = max_rooms;
        config.coin.max_count = 10;
        config.virus.count = 2;
        Arc::new(config)
    }

    fn guest(name: &str) -> JoinRequest {
        JoinRequest {
            display_name: name.to_string(),
            ..JoinRequest::default()
        }
    }

    #[tokio::test]
    async fn test_rooms_are_shared_by_name() {
        let registry = RoomRegistry::new(config(4), Arc::new(RecordingLedger::new()));
        let a = registry.get_or_create("main").await.unwrap();
        let b = registry.get_or_create("main").await.unwrap();
        registry.get_or_create("other").await.unwrap();
        assert_eq!(a.name(), b.name());
        assert_eq!(registry.room_count().await, 2);
        registry.shutdown().await;
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_limit() {
        let registry = RoomRegistry::new(config(1), Arc::new(RecordingLedger::new()));
        registry.get_or_create("one").await.unwrap();
        assert_eq!(
            registry.get_or_create("two").await.unwrap_err(),
            RoomError::LimitReached(1)
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_join_then_receive_snapshots() {
        let registry = RoomRegistry::new(config(4), Arc::new(RecordingLedger::new()));
        let room = registry.get_or_create("main").await.unwrap();
        let mut world_rx = room.subscribe_world();
        let mut targeted_rx = room.subscribe_targeted();

        let accepted = room.join(guest("p")).await.unwrap();
        let joined = timeout(Duration::from_secs(2), targeted_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(joined.is_for(accepted.session));
        assert!(matches!(joined.message, TargetedMessageType::Joined { session, .. } if session == accepted.session));

        let snapshot = timeout(Duration::from_secs(2), world_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.players.iter().any(|p| p.id == accepted.session));
        assert_eq!(snapshot.coins.len(), 10);

        room.send(RoomCommand::Leave { session: accepted.session })
            .await
            .unwrap();
        registry.shutdown().await;
        assert!(room.join(guest("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_refunds_locked_stake() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.deposit("alice", 100).await;
        let registry = RoomRegistry::new(config(4), Arc::clone(&ledger) as Arc<dyn StakeLedger>);
        let room = registry.get_or_create("main").await.unwrap();

        room.join(JoinRequest {
            display_name: "Alice".into(),
            user_id: Some("alice".into()),
            stake: 40,
            is_authenticated: true,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let locked = ledger.balance("alice").await.unwrap();
        assert_eq!((locked.available, locked.locked), (60, 40));

        registry.shutdown().await;
        let settled = ledger.balance("alice").await.unwrap();
        assert_eq!((settled.available, settled.locked), (100, 0));
    }
}
