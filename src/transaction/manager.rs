// ============================================================================
// Transaction Manager
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Transaction, TransactionId, TransactionState};
use crate::core::{DbError, Result};

/// Hands out transactions and parks statements that hit a row write lock
/// until the owning transaction ends.
#[derive(Default)]
pub struct TransactionManager {
    active: Mutex<HashMap<TransactionId, watch::Receiver<TransactionState>>>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Result<Transaction> {
        let id = TransactionId::new();
        let (notifier, receiver) = watch::channel(TransactionState::Active);
        self.active.lock()?.insert(id, receiver);
        debug!(txn = %id, "transaction started");
        Ok(Transaction::new(id, notifier))
    }

    /// Drop bookkeeping for a transaction that reached a terminal state.
    pub fn finish(&self, txn: &Transaction) -> Result<()> {
        match txn.state() {
            TransactionState::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            TransactionState::Aborted => self.aborted.fetch_add(1, Ordering::Relaxed),
            TransactionState::Active => {
                return Err(DbError::ExecutionError(format!(
                    "transaction {} is still active",
                    txn.id()
                )));
            }
        };
        self.active.lock()?.remove(&txn.id());
        debug!(
            txn = %txn.id(),
            state = %txn.state(),
            elapsed_ms = txn.duration().as_millis() as u64,
            "transaction finished"
        );
        Ok(())
    }

    /// Subscribe to lock releases by `owner`. `None` once it has finished.
    ///
    /// Subscribe before re-checking the row, so a release that lands in
    /// between is still seen by `wait_for_release`.
    pub fn subscribe(&self, owner: TransactionId) -> Result<Option<watch::Receiver<TransactionState>>> {
        let receiver = self.active.lock()?.get(&owner).cloned();
        Ok(receiver.map(|mut receiver| {
            receiver.mark_unchanged();
            receiver
        }))
    }

    /// Park until `owner` releases rows (by ending or by rolling back to a
    /// savepoint) or `deadline` passes.
    pub async fn wait_for_release(
        &self,
        owner: TransactionId,
        release: &mut watch::Receiver<TransactionState>,
        deadline: Instant,
    ) -> Result<()> {
        debug!(owner = %owner, "waiting for row lock");
        match tokio::time::timeout_at(deadline, release.changed()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                // Finished transactions drop their sender after deregistering.
                if self.active.lock()?.contains_key(&owner) {
                    warn!(owner = %owner, "lock owner vanished without finishing");
                    return Err(DbError::LockError(format!(
                        "{} was dropped while holding row locks",
                        owner
                    )));
                }
                Ok(())
            }
            Err(_) => {
                warn!(owner = %owner, "row lock wait timed out");
                Err(DbError::LockTimeout(format!("row is locked by {}", owner)))
            }
        }
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            active: self.active.lock().map(|active| active.len()).unwrap_or(0),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }
}
