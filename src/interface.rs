use async_trait::async_trait;

use crate::core::{Assignments, Filter, Result};
use crate::result::Record;

/// A live transactional handle.
///
/// `VersionedRecordStore` and `SavepointBatchExecutor` are written against
/// this trait only. `Connection` implements it over the in-memory store; a
/// wrapper around a real database session can implement it the same way.
///
/// The handle is owned exclusively by the caller for the duration of a
/// call, and statements run in the order they are awaited.
#[async_trait]
pub trait TransactionalStore: Send {
    /// Rows of `table` matching `filter`.
    async fn select(&mut self, table: &str, filter: &Filter) -> Result<Vec<Record>>;

    /// Insert one row; unassigned columns are NULL.
    async fn insert(&mut self, table: &str, values: &Assignments) -> Result<()>;

    /// Conditional UPDATE. Returns the number of affected rows; zero matches
    /// is not an error.
    async fn update(&mut self, table: &str, filter: &Filter, values: &Assignments) -> Result<u64>;

    async fn savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    /// Roll back to `name` and release it without suspending.
    ///
    /// Used from `Drop` when a batch is cancelled mid-flight, so it must not
    /// depend on an executor being available.
    fn discard_savepoint(&mut self, name: &str) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
