// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Undo log entries. Each applied statement records one entry per touched
// row; rolling back (fully or to a savepoint) replays them in reverse.
//
// ============================================================================

use crate::core::Row;

/// A single reversible row change
#[derive(Debug, Clone)]
pub enum Change {
    /// Row inserted by the transaction; undo removes it
    InsertRow { table: String, row_id: usize },

    /// Row updated by the transaction. `previous` is the transaction's own
    /// earlier pending image, or `None` if the row was unlocked before.
    UpdateRow {
        table: String,
        row_id: usize,
        previous: Option<Row>,
    },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> usize {
        match self {
            Change::InsertRow { row_id, .. } => *row_id,
            Change::UpdateRow { row_id, .. } => *row_id,
        }
    }
}
