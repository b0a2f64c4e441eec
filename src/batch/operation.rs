use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Assignments, Filter, Value};

/// One conditional UPDATE inside a batch: `filter` goes to WHERE,
/// `values` to SET.
#[derive(Debug, Clone, Default)]
pub struct BatchUpdateOperation {
    pub target: String,
    pub filter: Filter,
    pub values: Assignments,
}

impl BatchUpdateOperation {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            filter: Filter::new(),
            values: Assignments::new(),
        }
    }

    /// Add an equality to the WHERE side.
    pub fn matching(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = self.filter.eq(column, value);
        self
    }

    /// Replace the WHERE side.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values = self.values.set(column, value);
        self
    }
}

/// Per-call lifecycle of a batch.
///
/// `Committed` and `RolledBack` are terminal; nothing in between is
/// observable from outside the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Started,
    /// Applying the operation at this 1-based position.
    Applying(usize),
    Committed,
    RolledBack,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Committed | BatchState::RolledBack)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Started => write!(f, "STARTED"),
            BatchState::Applying(index) => write!(f, "APPLYING({})", index),
            BatchState::Committed => write!(f, "COMMITTED"),
            BatchState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Outcome of a batch: `{success, updated_count, errors}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub updated_count: u64,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub(crate) fn committed(updated_count: u64) -> Self {
        Self {
            success: true,
            updated_count,
            errors: Vec::new(),
        }
    }

    /// A rolled-back batch reports no rows: none of its work survived.
    pub(crate) fn rolled_back(error: String) -> Self {
        Self {
            success: false,
            updated_count: 0,
            errors: vec![error],
        }
    }

    pub fn state(&self) -> BatchState {
        if self.success {
            BatchState::Committed
        } else {
            BatchState::RolledBack
        }
    }
}
