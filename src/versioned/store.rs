use chrono::Utc;
use tracing::{debug, warn};

use super::{ConflictRetryPolicy, UpdateOutcome, UpdateStrategy};
use crate::connection::config::StoreConfig;
use crate::core::{Assignments, DbError, Filter, Result, Value};
use crate::interface::TransactionalStore;
use crate::result::Record;

/// Where a versioned entity lives and which columns carry its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    table: String,
    key_column: String,
    version_column: String,
    soft_delete_column: Option<String>,
}

impl EntityDescriptor {
    /// Entity keyed by `key_column`, versioned by `version`, soft-deleted
    /// through `deleted_at`.
    pub fn new(table: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            version_column: "version".to_string(),
            soft_delete_column: Some("deleted_at".to_string()),
        }
    }

    pub fn version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = column.into();
        self
    }

    pub fn soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    /// The entity is never soft-deleted.
    pub fn without_soft_delete(mut self) -> Self {
        self.soft_delete_column = None;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &str {
        &self.key_column
    }

    pub fn version(&self) -> &str {
        &self.version_column
    }

    pub fn soft_delete(&self) -> Option<&str> {
        self.soft_delete_column.as_deref()
    }
}

/// Optimistic-locking updates for one entity.
///
/// The version column is the concurrency token: an update names the
/// version it was computed from and succeeds only if the record is still
/// at that version, bumping it by one. The conditional UPDATE makes the
/// check and the write a single atomic step, so two writers holding the
/// same version can never both succeed. Committing is the caller's job.
#[derive(Debug, Clone)]
pub struct VersionedRecordStore {
    entity: EntityDescriptor,
    strategy: UpdateStrategy,
    retry: ConflictRetryPolicy,
}

impl VersionedRecordStore {
    pub fn new(entity: EntityDescriptor) -> Self {
        Self {
            entity,
            strategy: UpdateStrategy::default(),
            retry: ConflictRetryPolicy::default(),
        }
    }

    pub fn with_config(entity: EntityDescriptor, config: &StoreConfig) -> Self {
        Self {
            entity,
            strategy: config.update_strategy,
            retry: config.conflict_retry.clone(),
        }
    }

    pub fn strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry_policy(mut self, policy: ConflictRetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Policy configured for this store, for passing to `update_with_retry`.
    pub fn retry_policy(&self) -> &ConflictRetryPolicy {
        &self.retry
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    /// Insert a new record at version 1. Returns the initial version.
    pub async fn create<S>(&self, store: &mut S, key: impl Into<Value>, fields: &Assignments) -> Result<i64>
    where
        S: TransactionalStore + ?Sized,
    {
        self.check_writable(fields)?;
        let mut values = fields.clone();
        values.insert(self.entity.key_column.clone(), key);
        values.insert(self.entity.version_column.clone(), 1i64);
        if let Some(column) = &self.entity.soft_delete_column {
            values.insert(column.clone(), Value::Null);
        }
        store.insert(&self.entity.table, &values).await?;
        Ok(1)
    }

    /// The live record for `key`, if any.
    pub async fn get<S>(&self, store: &mut S, key: &Value) -> Result<Option<Record>>
    where
        S: TransactionalStore + ?Sized,
    {
        let filter = self.record_filter(key, &Filter::new());
        Ok(store.select(&self.entity.table, &filter).await?.into_iter().next())
    }

    /// Apply `field_updates` if the record is still at `expected_version`.
    ///
    /// `extra_conditions` are ANDed with the key match; the soft-delete
    /// guard is always added when the entity has one.
    pub async fn update<S>(
        &self,
        store: &mut S,
        identifier: &Value,
        field_updates: &Assignments,
        expected_version: i64,
        extra_conditions: &Filter,
    ) -> Result<UpdateOutcome>
    where
        S: TransactionalStore + ?Sized,
    {
        if field_updates.is_empty() {
            return Err(DbError::InvalidInput("field_updates must not be empty".into()));
        }
        if expected_version < 1 {
            return Err(DbError::InvalidInput(format!(
                "expected_version must be positive, got {}",
                expected_version
            )));
        }
        self.check_writable(field_updates)?;

        let filter = self.record_filter(identifier, extra_conditions);

        if self.strategy == UpdateStrategy::ReadThenWrite {
            match self.read_version(store, &filter).await? {
                None => return Ok(UpdateOutcome::NotFound),
                Some(current) if current != expected_version => {
                    warn!(
                        table = %self.entity.table,
                        key = %identifier,
                        expected_version,
                        current_version = current,
                        "stale version"
                    );
                    return Ok(UpdateOutcome::VersionConflict { current_version: current });
                }
                Some(_) => {}
            }
        }

        self.conditional_write(store, identifier, &filter, field_updates, expected_version)
            .await
    }

    /// Mark the record deleted. Afterwards every versioned operation on it
    /// reports `NotFound`.
    pub async fn soft_delete<S>(&self, store: &mut S, identifier: &Value, expected_version: i64) -> Result<UpdateOutcome>
    where
        S: TransactionalStore + ?Sized,
    {
        let column = self.entity.soft_delete_column.as_deref().ok_or_else(|| {
            DbError::UnsupportedOperation(format!(
                "entity '{}' has no soft-delete column",
                self.entity.table
            ))
        })?;
        let updates = Assignments::new().set(column, Utc::now());
        self.update(store, identifier, &updates, expected_version, &Filter::new())
            .await
    }

    /// Read-modify-write with conflict retry.
    ///
    /// Each attempt reads the live record, computes the field updates from
    /// it with `recompute`, and applies them against the version it read.
    /// Version conflicts are retried with backoff until `policy` runs out
    /// of attempts; the last outcome is returned.
    pub async fn update_with_retry<S, F>(
        &self,
        store: &mut S,
        identifier: &Value,
        extra_conditions: &Filter,
        policy: &ConflictRetryPolicy,
        mut recompute: F,
    ) -> Result<UpdateOutcome>
    where
        S: TransactionalStore + ?Sized,
        F: FnMut(&Record) -> Assignments + Send,
    {
        let filter = self.record_filter(identifier, extra_conditions);
        let attempts = policy.max_attempts.max(1);
        let mut outcome = UpdateOutcome::NotFound;

        for attempt in 1..=attempts {
            let Some(record) = store.select(&self.entity.table, &filter).await?.into_iter().next() else {
                return Ok(UpdateOutcome::NotFound);
            };
            let version = self.version_of(&record)?;
            let field_updates = recompute(&record);

            outcome = self
                .update(store, identifier, &field_updates, version, extra_conditions)
                .await?;
            match outcome {
                UpdateOutcome::VersionConflict { .. } if attempt < attempts => {
                    let delay = policy.backoff(attempt);
                    debug!(table = %self.entity.table, key = %identifier, attempt, ?delay, "retrying after conflict");
                    tokio::time::sleep(delay).await;
                }
                _ => return Ok(outcome),
            }
        }
        Ok(outcome)
    }

    async fn conditional_write<S>(
        &self,
        store: &mut S,
        identifier: &Value,
        filter: &Filter,
        field_updates: &Assignments,
        expected_version: i64,
    ) -> Result<UpdateOutcome>
    where
        S: TransactionalStore + ?Sized,
    {
        let next_version = expected_version.checked_add(1).ok_or_else(|| {
            DbError::InvalidInput(format!("version {} cannot be incremented", expected_version))
        })?;

        let guarded = filter.clone().eq(self.entity.version_column.clone(), expected_version);
        let mut assignments = field_updates.clone();
        assignments.insert(self.entity.version_column.clone(), next_version);

        let affected = store.update(&self.entity.table, &guarded, &assignments).await?;
        match affected {
            1 => {
                debug!(table = %self.entity.table, key = %identifier, version = next_version, "versioned update applied");
                Ok(UpdateOutcome::Success { version: next_version })
            }
            0 => match self.read_version(store, filter).await? {
                None => Ok(UpdateOutcome::NotFound),
                Some(current_version) => {
                    warn!(
                        table = %self.entity.table,
                        key = %identifier,
                        expected_version,
                        current_version,
                        "version conflict"
                    );
                    Ok(UpdateOutcome::VersionConflict { current_version })
                }
            },
            n => Err(DbError::ExecutionError(format!(
                "versioned update on '{}' matched {} rows; '{}' must be unique",
                self.entity.table, n, self.entity.key_column
            ))),
        }
    }

    async fn read_version<S>(&self, store: &mut S, filter: &Filter) -> Result<Option<i64>>
    where
        S: TransactionalStore + ?Sized,
    {
        let records = store.select(&self.entity.table, filter).await?;
        records.first().map(|record| self.version_of(record)).transpose()
    }

    fn version_of(&self, record: &Record) -> Result<i64> {
        let value = record.get(&self.entity.version_column).ok_or_else(|| {
            DbError::ColumnNotFound(self.entity.version_column.clone(), self.entity.table.clone())
        })?;
        value.as_i64().ok_or_else(|| {
            DbError::TypeMismatch(format!(
                "version column '{}' holds {}, expected INTEGER",
                self.entity.version_column,
                value.type_name()
            ))
        })
    }

    fn record_filter(&self, identifier: &Value, extra_conditions: &Filter) -> Filter {
        let mut filter = Filter::new()
            .eq(self.entity.key_column.clone(), identifier.clone())
            .and(extra_conditions);
        if let Some(column) = &self.entity.soft_delete_column {
            filter = filter.is_null(column.clone());
        }
        filter
    }

    /// The key is immutable and the version only moves through this store.
    fn check_writable(&self, fields: &Assignments) -> Result<()> {
        for column in [&self.entity.key_column, &self.entity.version_column] {
            if fields.contains(column) {
                return Err(DbError::InvalidInput(format!(
                    "column '{}' is managed by the versioned store",
                    column
                )));
            }
        }
        Ok(())
    }
}
