//! Background stake settlement.
//!
//! Ledger calls run as tasks tracked in a per-room [`JoinSet`]; the room
//! never awaits them from a tick. Each task reports a [`Completion`] over a
//! channel that the room drains at its next loop boundary.

use crate::entity::SessionId;
use crate::ledger::{LedgerError, OperationId, StakeLedger, StakeTransfer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::error;

/// Result of one ledger task.
#[derive(Debug, Clone)]
pub enum Completion {
    Reserved {
        session: SessionId,
        user: String,
        amount: u64,
        result: Result<(), LedgerError>,
    },
    Refunded {
        session: SessionId,
        user: String,
        amount: u64,
        result: Result<(), LedgerError>,
    },
    Transferred {
        winner: SessionId,
        loser: SessionId,
        transfer: StakeTransfer,
        result: Result<(), LedgerError>,
    },
}

/// Dispatches ledger tasks for one room.
pub struct Settlement {
    ledger: Arc<dyn StakeLedger>,
    tasks: JoinSet<()>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    /// Prefix making operation ids unique to this room instance.
    tag: String,
    next_op: u64,
}

impl Settlement {
    pub fn new(ledger: Arc<dyn StakeLedger>, room: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ledger,
            tasks: JoinSet::new(),
            tx,
            rx,
            tag: format!("{}-{:08x}", room, rand::random::<u32>()),
            next_op: 0,
        }
    }

    fn op(&mut self, kind: &str, user: &str) -> OperationId {
        self.next_op += 1;
        OperationId::new(format!("{}:{}:{}:{}", self.tag, self.next_op, kind, user))
    }

    /// Lock `amount` of `user`'s balance for `session`.
    pub fn reserve(&mut self, session: SessionId, user: String, amount: u64) {
        let op = self.op("reserve", &user);
        let ledger = Arc::clone(&self.ledger);
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let result = ledger.reserve(&op, &user, amount).await;
            let _ = tx.send(Completion::Reserved {
                session,
                user,
                amount,
                result,
            });
        });
    }

    /// Return `amount` of `user`'s locked stake.
    pub fn refund(&mut self, session: SessionId, user: String, amount: u64) {
        let op = self.op("refund", &user);
        let ledger = Arc::clone(&self.ledger);
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let result = ledger.refund(&op, &user, amount).await;
            let _ = tx.send(Completion::Refunded {
                session,
                user,
                amount,
                result,
            });
        });
    }

    /// Pay an eliminated player's stake to the winner.
    pub fn transfer(&mut self, winner: SessionId, loser: SessionId, transfer: StakeTransfer) {
        let op = self.op("transfer", &transfer.loser);
        let ledger = Arc::clone(&self.ledger);
        let tx = self.tx.clone();
        self.tasks.spawn(async move {
            let result = ledger.transfer(&op, &transfer).await;
            let _ = tx.send(Completion::Transferred {
                winner,
                loser,
                transfer,
                result,
            });
        });
    }

    /// Take every completion that has arrived, reaping finished tasks.
    pub fn completed(&mut self) -> Vec<Completion> {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Ledger task for {} failed: {}", self.tag, e);
            }
        }
        let mut done = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            done.push(completion);
        }
        done
    }

    /// Ledger tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every in-flight task and return all pending completions.
    pub async fn drain(&mut self) -> Vec<Completion> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("Ledger task for {} failed: {}", self.tag, e);
            }
        }
        self.completed()
    }
}
