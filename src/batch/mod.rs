// ============================================================================
// Savepoint Batches
// ============================================================================
//
// Ordered multi-row updates that commit together or leave no trace.
//
// ============================================================================

pub mod executor;
pub mod operation;

pub use executor::SavepointBatchExecutor;
pub use operation::{BatchResult, BatchState, BatchUpdateOperation};
