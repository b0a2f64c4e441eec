// ============================================================================
// Transaction Management Module
// ============================================================================
//
// READ COMMITTED transactions with row write locks and savepoints.
//
// - Writes install a pending image on the row; the pending image is the lock
// - The undo log (Change) reverts pending images on rollback
// - Savepoints are marks into the undo log
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod state;

pub use change::Change;
pub use manager::{TransactionManager, TransactionStats};
pub use state::{Transaction, TransactionId, TransactionState};
