use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Savepoint '{0}' already exists")]
    DuplicateSavepoint(String),

    #[error("Savepoint '{0}' does not exist")]
    SavepointNotFound(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),
}

impl DbError {
    /// Errors caused by the statement itself rather than by the store.
    pub fn is_statement_error(&self) -> bool {
        matches!(
            self,
            Self::ColumnNotFound(..)
                | Self::TableNotFound(_)
                | Self::TypeMismatch(_)
                | Self::ConstraintViolation(_)
                | Self::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
