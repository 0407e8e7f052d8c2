use thiserror::Error;

/// Errors from the SQL layer. Stores wrap these into `ServiceError::Storage`.
#[derive(Error, Debug)]
pub enum SQLError {
    /// SELECT preparation or row mapping failed.
    #[error("query error: {0}")]
    Query(String),

    /// INSERT/UPDATE/DELETE or batch execution failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Opening or configuring the database failed.
    #[error("connection error: {0}")]
    Connection(String),
}
