// ============================================================================
// Transaction State Management
// ============================================================================
//
// Lifecycle: Active -> Committed | Aborted.
//
// A transaction owns its undo log and the stack of savepoints that index
// into it. Row images live in the tables; the log only knows how to put
// them back.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use super::Change;
use crate::core::{DbError, Result, validate_identifier};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug, Clone)]
struct Savepoint {
    name: String,
    /// Undo-log length when the savepoint was established
    mark: usize,
}

/// An open transaction on one connection.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    savepoints: Vec<Savepoint>,
    /// Lock waiters subscribe to this through the manager
    notifier: watch::Sender<TransactionState>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, notifier: watch::Sender<TransactionState>) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            savepoints: Vec::new(),
            notifier,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn savepoint_names(&self) -> Vec<&str> {
        self.savepoints.iter().map(|sp| sp.name.as_str()).collect()
    }

    pub fn record_changes(&mut self, changes: Vec<Change>) -> Result<()> {
        self.ensure_active("record change")?;
        self.changes.extend(changes);
        Ok(())
    }

    /// Establish a savepoint at the current end of the undo log.
    ///
    /// Savepoint names are unique among the savepoints in flight.
    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_active("establish savepoint")?;
        validate_identifier("savepoint", name)?;
        if self.savepoints.iter().any(|sp| sp.name == name) {
            return Err(DbError::DuplicateSavepoint(name.to_string()));
        }
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            mark: self.changes.len(),
        });
        Ok(())
    }

    /// Detach every change made after `name` and destroy the savepoints
    /// established after it. The named savepoint stays.
    ///
    /// Returned changes are in application order; undo them in reverse.
    pub fn rollback_to(&mut self, name: &str) -> Result<Vec<Change>> {
        self.ensure_active("roll back to savepoint")?;
        let position = self.find_savepoint(name)?;
        let mark = self.savepoints[position].mark;
        self.savepoints.truncate(position + 1);
        Ok(self.changes.split_off(mark))
    }

    /// Forget `name` and every later savepoint, keeping their changes.
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.ensure_active("release savepoint")?;
        let position = self.find_savepoint(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    /// Rows with a pending image owned by this transaction, grouped by table.
    pub fn write_set(&self) -> BTreeMap<String, BTreeSet<usize>> {
        let mut rows: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for change in &self.changes {
            rows.entry(change.table_name().to_string())
                .or_default()
                .insert(change.row_id());
        }
        rows
    }

    /// Wake lock waiters after rows were unlocked without ending the
    /// transaction, as a rollback to a savepoint does.
    pub fn notify_waiters(&self) {
        self.notifier.send_replace(self.state);
    }

    /// Mark committed and wake lock waiters.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.state = TransactionState::Committed;
        self.savepoints.clear();
        self.notifier.send_replace(self.state);
        Ok(())
    }

    /// Hand back the whole undo log for a full rollback.
    ///
    /// Revert the changes in reverse order, then call `abort` so waiters
    /// only wake once the rows are unlocked.
    pub fn take_changes(&mut self) -> Result<Vec<Change>> {
        self.ensure_active("roll back")?;
        self.savepoints.clear();
        Ok(std::mem::take(&mut self.changes))
    }

    pub fn abort(&mut self) -> Result<()> {
        self.ensure_active("roll back")?;
        self.state = TransactionState::Aborted;
        self.notifier.send_replace(self.state);
        Ok(())
    }

    fn find_savepoint(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| DbError::SavepointNotFound(name.to_string()))
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::ExecutionError(format!(
                "Cannot {}: transaction {} is {}",
                action, self.id, self.state
            )));
        }
        Ok(())
    }
}
