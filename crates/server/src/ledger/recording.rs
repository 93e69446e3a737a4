//! Recording ledger for tests and dry runs.
//!
//! Every call is logged in order. Failures can be scripted per operation
//! kind, and reserves or transfers can be held in flight until released.

use super::{LedgerError, OperationId, StakeLedger, StakeTransfer};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// One call seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Reserve {
        op: OperationId,
        user: String,
        amount: u64,
    },
    Refund {
        op: OperationId,
        user: String,
        amount: u64,
    },
    Transfer {
        op: OperationId,
        transfer: StakeTransfer,
    },
}

/// A ledger that records calls and always succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingLedger {
    calls: Mutex<Vec<LedgerCall>>,
    fail_reserve: AtomicBool,
    fail_refund: AtomicBool,
    fail_transfer: AtomicBool,
    hold_reserve: AtomicBool,
    hold_transfer: AtomicBool,
    released: Notify,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls seen so far, in dispatch order.
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.lock().clone()
    }

    pub fn transfers(&self) -> Vec<StakeTransfer> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                LedgerCall::Transfer { transfer, .. } => Some(transfer.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn refunds(&self) -> Vec<(String, u64)> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                LedgerCall::Refund { user, amount, .. } => Some((user.clone(), *amount)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_reserves(&self, fail: bool) {
        self.fail_reserve.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refund.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfer.store(fail, Ordering::SeqCst);
    }

    /// Keep reserves in flight until [`release`](Self::release).
    pub fn hold_reserves(&self) {
        self.hold_reserve.store(true, Ordering::SeqCst);
    }

    /// Keep transfers in flight until [`release`](Self::release).
    pub fn hold_transfers(&self) {
        self.hold_transfer.store(true, Ordering::SeqCst);
    }

    /// Let every held call complete.
    pub fn release(&self) {
        self.hold_reserve.store(false, Ordering::SeqCst);
        self.hold_transfer.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn wait_while(&self, flag: &AtomicBool) {
        loop {
            let released = self.released.notified();
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    fn outcome(fail: &AtomicBool) -> Result<(), LedgerError> {
        if fail.load(Ordering::SeqCst) {
            Err(LedgerError::Unavailable("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

impl StakeLedger for RecordingLedger {
    fn reserve<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        self.lock().push(LedgerCall::Reserve {
            op: op.clone(),
            user: user.to_string(),
            amount,
        });
        async move {
            self.wait_while(&self.hold_reserve).await;
            Self::outcome(&self.fail_reserve)
        }
        .boxed()
    }

    fn refund<'a>(
        &'a self,
        op: &'a OperationId,
        user: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        self.lock().push(LedgerCall::Refund {
            op: op.clone(),
            user: user.to_string(),
            amount,
        });
        async move { Self::outcome(&self.fail_refund) }.boxed()
    }

    fn transfer<'a>(
        &'a self,
        op: &'a OperationId,
        transfer: &'a StakeTransfer,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        self.lock().push(LedgerCall::Transfer {
            op: op.clone(),
            transfer: transfer.clone(),
        });
        async move {
            self.wait_while(&self.hold_transfer).await;
            Self::outcome(&self.fail_transfer)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_held_transfer_waits_for_release() {
        let ledger = Arc::new(RecordingLedger::new());
        ledger.hold_transfers();

        let task = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                let t = StakeTransfer {
                    winner: "w".into(),
                    loser: "l".into(),
                    amount: 3,
                    winner_name: "W".into(),
                    loser_name: "L".into(),
                };
                ledger.transfer(&OperationId::new("t"), &t).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert_eq!(ledger.transfers().len(), 1);

        ledger.release();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let ledger = RecordingLedger::new();
        ledger.fail_reserves(true);
        let result = ledger.reserve(&OperationId::new("r"), "u", 1).await;
        assert!(matches!(result, Err(LedgerError::Unavailable(_))));
        assert_eq!(ledger.calls().len(), 1);
    }
}
