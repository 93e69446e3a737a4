//! In-process double-entry ledger.

use super::{LedgerError, OperationId, StakeLedger, StakeTransfer};
use crate::config::AccountConfig;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

/// Balances of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub available: u64,
    pub locked: u64,
}

/// Which side of an account a journal row touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Available,
    Locked,
}

/// One journal row. Rows of an operation sum to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: OperationId,
    pub account: String,
    pub bucket: Bucket,
    pub delta: i128,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, Balance>,
    journal: Vec<JournalEntry>,
    applied: HashSet<OperationId>,
}

impl Inner {
    fn post(&mut self, op: &OperationId, rows: [(String, Bucket, i128); 2]) {
        for (account, bucket, delta) in rows {
            self.journal.push(JournalEntry {
                op: op.clone(),
                account,
                bucket,
                delta,
            });
        }
        self.applied.insert(op.clone());
    }

    fn account_mut(&mut self, user: &str) -> Result<&mut Balance, LedgerError> {
        self.accounts
            .get_mut(user)
            .ok_or_else(|| LedgerError::UnknownAccount(user.to_string()))
    }

    fn reserve(&mut self, op: &OperationId, user: &str, amount: u64) -> Result<(), LedgerError> {
        if self.applied.contains(op) {
            debug!("Ledger op {} already applied", op);
            return Ok(());
        }
        let account = self.account_mut(user)?;
        if account.available < amount {
            return Err(LedgerError::InsufficientFunds {
                user: user.to_string(),
                needed: amount,
                available: account.available,
            });
        }
        account.available -= amount;
        account.locked += amount;
        let delta = amount as i128;
        self.post(
            op,
            [
                (user.to_string(), Bucket::Available, -delta),
                (user.to_string(), Bucket::Locked, delta),
            ],
        );
        Ok(())
    }

    fn refund(&mut self, op: &OperationId, user: &str, amount: u64) -> Result<(), LedgerError> {
        if self.applied.contains(op) {
            debug!("Ledger op {} already applied", op);
            return Ok(());
        }
        let account = self.account_mut(user)?;
        if account.locked < amount {
            return Err(LedgerError::InsufficientLocked {
                user: user.to_string(),
                needed: amount,
                locked: account.locked,
            });
        }
        account.locked -= amount;
        account.available += amount;
        let delta = amount as i128;
        self.post(
            op,
            [
                (user.to_string(), Bucket::Locked, -delta),
                (user.to_string(), Bucket::Available, delta),
            ],
        );
        Ok(())
    }

    fn transfer(&mut self, op: &OperationId, t: &StakeTransfer) -> Result<(), LedgerError> {
        if self.applied.contains(op) {
            debug!("Ledger op {} already applied", op);
            return Ok(());
        }
        if !self.accounts.contains_key(&t.winner) {
            return Err(LedgerError::UnknownAccount(t.winner.clone()));
        }
        let loser = self.account_mut(&t.loser)?;
        if loser.locked < t.amount {
            return Err(LedgerError::InsufficientLocked {
                user: t.loser.clone(),
                needed: t.amount,
                locked: loser.locked,
            });
        }
        loser.locked -= t.amount;
        self.account_mut(&t.winner)?.available += t.amount;
        let delta = t.amount as i128;
        self.post(
            op,
            [
                (t.loser.clone(), Bucket::Locked, -delta),
                (t.winner.clone(), Bucket::Available, delta),
            ],
        );
        Ok(())
    }
}

/// Ledger holding available and locked balances with an append-only
/// journal.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open one account per configured entry.
    pub fn with_accounts(accounts: &[AccountConfig]) -> Self {
        let inner = Inner {
            accounts: accounts
                .iter()
                .map(|a| {
                    (
                        a.user_id.clone(),
                        Balance {
                            available: a.balance,
                            locked: 0,
                        },
                    )
                })
                .collect(),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Open or top up an account.
    pub async fn deposit(&self, user: &str, amount: u64) {
        let mut inner = self.inner.lock().await;
        inner.accounts.entry(user.to_string()).or_default().available += amount;
    }

    pub async fn balance(&self, user: &str) -> Option<Balance> {
        self.inner.lock().await.accounts.get(user).copied()
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.inner.lock().await.journal.clone()
    }
}

impl StakeLedger for MemoryLedger {
    fn reserve<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        async move { self.inner.lock().await.reserve(op, user, amount) }.boxed()
    }

    fn refund<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        async move { self.inner.lock().await.refund(op, user, amount) }.boxed()
    }

    fn transfer<'a>(
        &'a self,
        op: &'a OperationId,
        transfer: &'a StakeTransfer,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        async move { self.inner.lock().await.transfer(op, transfer) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> MemoryLedger {
        MemoryLedger::with_accounts(&[
            AccountConfig {
                user_id: "alice".into(),
                ticket: "a".into(),
                balance: 100,
            },
            AccountConfig {
                user_id: "bob".into(),
                ticket: "b".into(),
                balance: 50,
            },
        ])
    }

    fn transfer(amount: u64) -> StakeTransfer {
        StakeTransfer {
            winner: "bob".into(),
            loser: "alice".into(),
            amount,
            winner_name: "Bob".into(),
            loser_name: "Alice".into(),
        }
    }

    #[tokio::test]
    async fn test_reserve_then_transfer() {
        let ledger = ledger();
        ledger.reserve(&OperationId::new("r1"), "alice", 10).await.unwrap();
        assert_eq!(
            ledger.balance("alice").await,
            Some(Balance { available: 90, locked: 10 })
        );

        ledger.transfer(&OperationId::new("t1"), &transfer(10)).await.unwrap();
        assert_eq!(
            ledger.balance("alice").await,
            Some(Balance { available: 90, locked: 0 })
        );
        assert_eq!(
            ledger.balance("bob").await,
            Some(Balance { available: 60, locked: 0 })
        );
    }

    #[tokio::test]
    async fn test_replayed_op_is_ignored() {
        let ledger = ledger();
        let op = OperationId::new("r1");
        ledger.reserve(&op, "alice", 10).await.unwrap();
        ledger.reserve(&op, "alice", 10).await.unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap().locked, 10);

        ledger.refund(&OperationId::new("f1"), "alice", 10).await.unwrap();
        ledger.refund(&OperationId::new("f1"), "alice", 10).await.unwrap();
        assert_eq!(
            ledger.balance("alice").await,
            Some(Balance { available: 100, locked: 0 })
        );
    }

    #[tokio::test]
    async fn test_failures_change_nothing() {
        let ledger = ledger();
        assert!(matches!(
            ledger.reserve(&OperationId::new("r1"), "alice", 500).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.reserve(&OperationId::new("r2"), "carol", 1).await,
            Err(LedgerError::UnknownAccount(_))
        ));
        assert!(matches!(
            ledger.transfer(&OperationId::new("t1"), &transfer(5)).await,
            Err(LedgerError::InsufficientLocked { .. })
        ));
        assert!(ledger.journal().await.is_empty());

        // A failed id may be retried once the precondition holds.
        ledger.deposit("alice", 400).await;
        ledger.reserve(&OperationId::new("r1"), "alice", 500).await.unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap().locked, 500);
    }

    #[tokio::test]
    async fn test_journal_balances() {
        let ledger = ledger();
        ledger.reserve(&OperationId::new("r1"), "alice", 30).await.unwrap();
        ledger.transfer(&OperationId::new("t1"), &transfer(20)).await.unwrap();
        ledger.refund(&OperationId::new("f1"), "alice", 10).await.unwrap();

        let journal = ledger.journal().await;
        assert_eq!(journal.len(), 6);
        assert_eq!(journal.iter().map(|e| e.delta).sum::<i128>(), 0);

        let alice = ledger.balance("alice").await.unwrap();
        let bob = ledger.balance("bob").await.unwrap();
        assert_eq!(alice.available + alice.locked + bob.available + bob.locked, 150);
    }
}
