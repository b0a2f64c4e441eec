use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::batch::SavepointBatchExecutor;
use crate::connection::Connection;
use crate::connection::config::StoreConfig;
use crate::core::Result;
use crate::storage::{InMemoryStorage, TableSchema};
use crate::transaction::{TransactionManager, TransactionStats};
use crate::versioned::{EntityDescriptor, VersionedRecordStore};

/// In-memory transactional database
///
/// Owns the tables, the transaction manager and the configuration, and
/// hands out independent connections. Cloning is cheap; clones share
/// everything.
#[derive(Clone)]
pub struct Database {
    storage: Arc<InMemoryStorage>,
    transactions: Arc<TransactionManager>,
    config: Arc<StoreConfig>,
    next_connection_id: Arc<AtomicU64>,
}

impl Database {
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Create a database with custom configuration
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            transactions: Arc::new(TransactionManager::new()),
            config: Arc::new(config),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        self.storage.create_table(schema)?;
        info!(table = %name, "table created");
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.storage.drop_table(name)?;
        info!(table = %name, "table dropped");
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.storage.table_exists(name)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.storage.list_tables()
    }

    /// Open a new connection. Each connection runs its own transactions.
    pub fn connect(&self) -> Connection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        Connection::new(
            id,
            Arc::clone(&self.storage),
            Arc::clone(&self.transactions),
            Arc::clone(&self.config),
        )
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> TransactionStats {
        self.transactions.stats()
    }

    /// Versioned store for `entity`, using this database's update strategy
    /// and retry policy.
    pub fn versioned(&self, entity: EntityDescriptor) -> VersionedRecordStore {
        VersionedRecordStore::with_config(entity, &self.config)
    }

    pub fn batch_executor(&self) -> SavepointBatchExecutor {
        SavepointBatchExecutor::new()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{Column, DataType};
    use crate::versioned::UpdateStrategy;

    #[test]
    fn test_connections_get_distinct_ids() {
        let db = Database::new();
        let first = db.connect();
        let second = db.connect();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_table_lifecycle() {
        let db = Database::new();
        db.create_table(TableSchema::new("companies", vec![Column::new("ticker", DataType::Text)]).unwrap())
            .unwrap();
        assert!(db.table_exists("companies"));
        assert_eq!(db.list_tables().unwrap(), vec!["companies".to_string()]);

        db.drop_table("companies").unwrap();
        assert!(!db.table_exists("companies"));
    }

    #[test]
    fn test_with_config_validates() {
        assert!(Database::with_config(StoreConfig::new().lock_timeout(Duration::ZERO)).is_err());

        let db = Database::with_config(StoreConfig::new().update_strategy(UpdateStrategy::ReadThenWrite)).unwrap();
        assert_eq!(db.config().update_strategy, UpdateStrategy::ReadThenWrite);
    }
}
