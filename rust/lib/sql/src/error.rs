use thiserror::Error;

#[derive(Error, Debug)]
pub enum SQLError {
    #[error("query error: {0}")]
    Query(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// A UNIQUE / CHECK / NOT NULL constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The transaction body asked for a rollback.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl SQLError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, SQLError::Constraint(_))
    }
}
