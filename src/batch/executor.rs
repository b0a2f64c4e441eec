use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

use super::{BatchResult, BatchState, BatchUpdateOperation};
use crate::core::{DbError, Result};
use crate::interface::TransactionalStore;

/// Applies an ordered list of updates as one all-or-nothing unit inside
/// the caller's transaction.
///
/// The batch runs under its own savepoint. If operation `k` fails, the
/// savepoint is rolled back so operations `1..k` leave no trace, while
/// work done on the connection before the batch stays intact and the
/// connection stays usable. If every operation succeeds the transaction
/// is committed. Operations run strictly in order, so a later operation
/// may overwrite an earlier one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavepointBatchExecutor;

impl SavepointBatchExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `operations` under a caller-named savepoint.
    ///
    /// The name must be an identifier and must not be in flight on the
    /// connection already.
    pub async fn execute<S>(
        &self,
        store: &mut S,
        operations: Vec<BatchUpdateOperation>,
        savepoint_name: &str,
    ) -> Result<BatchResult>
    where
        S: TransactionalStore + ?Sized,
    {
        if operations.is_empty() {
            return Err(DbError::InvalidInput("batch has no operations".into()));
        }

        let span = info_span!(
            "batch.execute",
            savepoint = %savepoint_name,
            operations = operations.len()
        );
        run_batch(store, operations, savepoint_name).instrument(span).await
    }

    /// Run `operations` under a freshly generated savepoint name.
    pub async fn execute_isolated<S>(
        &self,
        store: &mut S,
        operations: Vec<BatchUpdateOperation>,
    ) -> Result<BatchResult>
    where
        S: TransactionalStore + ?Sized,
    {
        let name = format!("batch_{}", Uuid::new_v4().simple());
        self.execute(store, operations, &name).await
    }
}

async fn run_batch<S>(store: &mut S, operations: Vec<BatchUpdateOperation>, savepoint_name: &str) -> Result<BatchResult>
where
    S: TransactionalStore + ?Sized,
{
    store.savepoint(savepoint_name).await?;
    let mut guard = SavepointGuard::new(store, savepoint_name);
    transition(BatchState::Started);

    let mut updated_count = 0u64;
    for (index, operation) in operations.into_iter().enumerate() {
        let position = index + 1;
        transition(BatchState::Applying(position));

        let applied = guard
            .store()
            .update(&operation.target, &operation.filter, &operation.values)
            .await;
        match applied {
            Ok(affected) => updated_count += affected,
            Err(err) if err.is_statement_error() => {
                let message = format!("operation {}: {}", position, err);
                event!(Level::WARN, error = %err, operation = position, "batch operation failed");
                guard.roll_back().await?;
                transition(BatchState::RolledBack);
                return Ok(BatchResult::rolled_back(message));
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, operation = position, "batch aborted by store error");
                if let Err(cleanup) = guard.roll_back().await {
                    event!(Level::ERROR, error = %cleanup, "batch savepoint cleanup failed");
                }
                transition(BatchState::RolledBack);
                return Err(err);
            }
        }
    }

    guard.commit().await?;
    transition(BatchState::Committed);
    Ok(BatchResult::committed(updated_count))
}

fn transition(state: BatchState) {
    event!(Level::DEBUG, state = %state, "batch state");
}

/// Owns the batch savepoint until the batch reaches a terminal state.
///
/// Dropping an armed guard, which happens when the batch future is
/// cancelled, rolls the savepoint back synchronously.
struct SavepointGuard<'a, S: TransactionalStore + ?Sized> {
    store: &'a mut S,
    name: &'a str,
    armed: bool,
}

impl<'a, S: TransactionalStore + ?Sized> SavepointGuard<'a, S> {
    fn new(store: &'a mut S, name: &'a str) -> Self {
        Self {
            store,
            name,
            armed: true,
        }
    }

    fn store(&mut self) -> &mut S {
        &mut *self.store
    }

    async fn roll_back(&mut self) -> Result<()> {
        self.store.rollback_to_savepoint(self.name).await?;
        self.store.release_savepoint(self.name).await?;
        self.armed = false;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.store.release_savepoint(self.name).await?;
        self.armed = false;
        self.store.commit().await
    }
}

impl<S: TransactionalStore + ?Sized> Drop for SavepointGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.discard_savepoint(self.name) {
            Ok(()) => event!(Level::WARN, savepoint = %self.name, "batch cancelled; savepoint discarded"),
            Err(err) => {
                event!(Level::ERROR, savepoint = %self.name, error = %err, "failed to discard batch savepoint")
            }
        }
    }
}
