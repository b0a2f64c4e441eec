// ============================================================================
// rowversion Library
// ============================================================================
//
// Optimistic-locking record updates and savepoint-scoped batch rollback,
// written against a transactional store seam and shipped with an in-memory
// backing store.
//
// ============================================================================

pub mod batch;
pub mod connection;
pub mod core;
pub mod facade;
pub mod interface;
pub mod result;
pub mod storage;
pub mod transaction;
pub mod versioned;

// Re-export main types for convenience
pub use core::{Assignments, Column, DataType, DbError, Filter, Result, Value};
pub use facade::Database;
pub use interface::TransactionalStore;
pub use result::Record;
pub use storage::TableSchema;

// Re-export connection API
pub use connection::{Connection, config::StoreConfig};
pub use transaction::{TransactionId, TransactionStats};

// Re-export the two primitives
pub use batch::{BatchResult, BatchState, BatchUpdateOperation, SavepointBatchExecutor};
pub use versioned::{
    ConflictRetryPolicy, EntityDescriptor, UpdateOutcome, UpdateResponse, UpdateStrategy,
    VersionedRecordStore,
};
