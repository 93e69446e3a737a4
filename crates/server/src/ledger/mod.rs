//! Stake ledger adapter.
//!
//! The simulation never owns funds. It issues reserve, refund and transfer
//! intents against a [`StakeLedger`] and treats the ledger as the system of
//! record. Every call carries an [`OperationId`]; implementations must
//! treat a replayed id as already applied.

mod memory;
pub mod recording;

pub use memory::{Balance, Bucket, JournalEntry, MemoryLedger};
pub use recording::{LedgerCall, RecordingLedger};

use futures_util::future::BoxFuture;
use std::fmt;
use thiserror::Error;

/// Ledger failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown account {0}")]
    UnknownAccount(String),
    #[error("insufficient funds in {user}: need {needed}, have {available}")]
    InsufficientFunds {
        user: String,
        needed: u64,
        available: u64,
    },
    #[error("insufficient locked stake for {user}: need {needed}, have {locked}")]
    InsufficientLocked { user: String, needed: u64, locked: u64 },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Idempotency key for one ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A settled elimination: `amount` of the loser's locked stake goes to the
/// winner's available balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeTransfer {
    pub winner: String,
    pub loser: String,
    pub amount: u64,
    pub winner_name: String,
    pub loser_name: String,
}

/// The external account store stakes are locked in.
pub trait StakeLedger: Send + Sync {
    /// Move `amount` from the user's available balance to locked.
    fn reserve<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Return `amount` of the user's locked stake to available.
    fn refund<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Pay the loser's locked stake to the winner.
    fn transfer<'a>(
        &'a self,
        op: &'a OperationId,
        transfer: &'a StakeTransfer,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;
}
