pub mod config;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{Assignments, DbError, Filter, Result};
use crate::interface::TransactionalStore;
use crate::result::Record;
use crate::storage::{InMemoryStorage, Table, WriteOutcome};
use crate::transaction::{
    Change, Transaction, TransactionId, TransactionManager, TransactionState,
};
use config::StoreConfig;

/// Database connection handle
///
/// Owns at most one transaction. The first statement after a commit or
/// rollback begins a new one implicitly; `begin` does so explicitly.
/// Statement errors leave the transaction open and usable.
pub struct Connection {
    id: u64,
    storage: Arc<InMemoryStorage>,
    transactions: Arc<TransactionManager>,
    config: Arc<StoreConfig>,
    state: ConnectionState,
    transaction: Option<Transaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        storage: Arc<InMemoryStorage>,
        transactions: Arc<TransactionManager>,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self {
            id,
            storage,
            transactions,
            config,
            state: ConnectionState::Active,
            transaction: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }

    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction.as_ref().map(Transaction::id)
    }

    /// Savepoints in flight, oldest first.
    pub fn savepoints(&self) -> Vec<String> {
        self.transaction
            .as_ref()
            .map(|txn| txn.savepoint_names().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Begin a transaction explicitly.
    pub fn begin(&mut self) -> Result<TransactionId> {
        self.ensure_open()?;
        if self.transaction.is_some() {
            return Err(DbError::ExecutionError("Transaction already active".into()));
        }
        self.ensure_transaction()
    }

    /// Roll back any open transaction and close the connection.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.rollback_now()?;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(DbError::ConnectionClosed(self.id));
        }
        Ok(())
    }

    fn ensure_transaction(&mut self) -> Result<TransactionId> {
        if let Some(txn) = &self.transaction {
            return Ok(txn.id());
        }
        let txn = self.transactions.begin()?;
        let id = txn.id();
        self.transaction = Some(txn);
        self.state = ConnectionState::InTransaction;
        Ok(id)
    }

    fn current_transaction(&mut self) -> Result<&mut Transaction> {
        self.transaction
            .as_mut()
            .ok_or_else(|| DbError::ExecutionError("No active transaction".into()))
    }

    fn scan(&mut self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let handle = self.storage.get_table(table)?;
        let txn_id = self.ensure_transaction()?;

        let guard = handle.read()?;
        let schema = guard.schema().shared_schema();
        let rows = guard.scan(txn_id, filter)?;
        Ok(rows
            .into_iter()
            .map(|row| Record::new(Arc::clone(&schema), row))
            .collect())
    }

    async fn insert_row(&mut self, table: &str, values: &Assignments) -> Result<()> {
        self.ensure_open()?;
        let handle = self.storage.get_table(table)?;
        let txn_id = self.ensure_transaction()?;

        let changes = self
            .write_waiting(&handle, txn_id, |rows, txn| rows.insert(txn, values))
            .await?;
        debug!(conn = self.id, txn = %txn_id, table, "row inserted");
        self.current_transaction()?.record_changes(changes)
    }

    async fn update_rows(&mut self, table: &str, filter: &Filter, values: &Assignments) -> Result<u64> {
        self.ensure_open()?;
        let handle = self.storage.get_table(table)?;
        let txn_id = self.ensure_transaction()?;

        let changes = self
            .write_waiting(&handle, txn_id, |rows, txn| rows.update_where(txn, filter, values))
            .await?;
        let affected = changes.len() as u64;
        self.current_transaction()?.record_changes(changes)?;
        debug!(conn = self.id, txn = %txn_id, table, affected, "update applied");
        Ok(affected)
    }

    /// Run a write statement, re-evaluating it whenever the transaction
    /// holding a conflicting row lock releases rows, until it applies or
    /// the lock timeout passes.
    async fn write_waiting<F>(
        &mut self,
        handle: &RwLock<Table>,
        txn_id: TransactionId,
        mut statement: F,
    ) -> Result<Vec<Change>>
    where
        F: FnMut(&mut Table, TransactionId) -> Result<WriteOutcome> + Send,
    {
        let deadline = Instant::now() + self.config.lock_timeout;
        let mut watching: Option<(TransactionId, watch::Receiver<TransactionState>)> = None;

        loop {
            let outcome = statement(&mut *handle.write()?, txn_id)?;
            let owner = match outcome {
                WriteOutcome::Applied(changes) => return Ok(changes),
                WriteOutcome::Blocked(owner) => owner,
            };

            // Nothing was applied. Subscribe before waiting and evaluate once
            // more, so a release between the two is not missed.
            match watching.take() {
                Some((watched, mut release)) if watched == owner => {
                    self.transactions
                        .wait_for_release(owner, &mut release, deadline)
                        .await?;
                    watching = Some((owner, release));
                }
                _ => {
                    if Instant::now() >= deadline {
                        return Err(DbError::LockTimeout(format!("row is locked by {}", owner)));
                    }
                    watching = self
                        .transactions
                        .subscribe(owner)?
                        .map(|release| (owner, release));
                }
            }
        }
    }

    fn establish_savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.ensure_transaction()?;
        self.current_transaction()?.savepoint(name)?;
        debug!(conn = self.id, savepoint = name, "savepoint established");
        Ok(())
    }

    fn rollback_to_mark(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let txn = self
            .transaction
            .as_mut()
            .ok_or_else(|| DbError::SavepointNotFound(name.to_string()))?;
        let txn_id = txn.id();
        let undone = txn.rollback_to(name)?;
        self.undo(txn_id, &undone)?;
        if !undone.is_empty()
            && let Some(txn) = &self.transaction
        {
            txn.notify_waiters();
        }
        debug!(conn = self.id, savepoint = name, reverted = undone.len(), "rolled back to savepoint");
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.transaction
            .as_mut()
            .ok_or_else(|| DbError::SavepointNotFound(name.to_string()))?
            .release(name)
    }

    fn undo(&self, txn_id: TransactionId, changes: &[Change]) -> Result<()> {
        for change in changes.iter().rev() {
            // A table dropped mid-transaction has nothing left to revert.
            if let Ok(handle) = self.storage.get_table(change.table_name()) {
                handle.write()?.undo(txn_id, change);
            }
        }
        Ok(())
    }

    fn commit_now(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(mut txn) = self.transaction.take() else {
            return Ok(());
        };
        self.state = ConnectionState::Active;

        for (table, rows) in txn.write_set() {
            if let Ok(handle) = self.storage.get_table(&table) {
                let mut guard = handle.write()?;
                for row_id in rows {
                    guard.publish(txn.id(), row_id);
                }
            }
        }
        txn.commit()?;
        self.transactions.finish(&txn)
    }

    fn rollback_now(&mut self) -> Result<()> {
        let Some(mut txn) = self.transaction.take() else {
            return Ok(());
        };
        if self.state == ConnectionState::InTransaction {
            self.state = ConnectionState::Active;
        }

        let changes = txn.take_changes()?;
        self.undo(txn.id(), &changes)?;
        txn.abort()?;
        self.transactions.finish(&txn)
    }
}

#[async_trait]
impl TransactionalStore for Connection {
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.scan(table, filter)
    }

    async fn insert(&mut self, table: &str, values: &Assignments) -> Result<()> {
        self.insert_row(table, values).await
    }

    async fn update(&mut self, table: &str, filter: &Filter, values: &Assignments) -> Result<u64> {
        self.update_rows(table, filter, values).await
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.establish_savepoint(name)
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.rollback_to_mark(name)
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.release(name)
    }

    fn discard_savepoint(&mut self, name: &str) -> Result<()> {
        self.rollback_to_mark(name)?;
        self.release(name)
    }

    async fn commit(&mut self) -> Result<()> {
        self.commit_now()
    }

    async fn rollback(&mut self) -> Result<()> {
        self.rollback_now()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.rollback_now() {
            warn!(conn = self.id, error = %err, "rollback on drop failed");
        }
    }
}
