//! Error types shared by the store adapters and the consumer core

use thiserror::Error;

/// Result type for consumer server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for consumer server operations
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error - invalid input data (topic names, connection strings)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Connection error - database unreachable or authentication failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Database error - SQL errors, constraint violations
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Pool error - connection pool issues
    #[error("Pool error: {0}")]
    PoolError(String),

    /// Channel error - a consumer connection rejected a send or close
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Worker error - operation not allowed in the worker's current state
    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl Error {
    /// True when retrying the same call may succeed
    ///
    /// Store outages are transient; rejected input never is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ConnectionError(_) | Error::DatabaseError(_) | Error::PoolError(_)
        )
    }
}

/// Convert tokio-postgres errors to store errors
impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            return Error::DatabaseError(format!(
                "{}: {}",
                db_error.code().code(),
                db_error.message()
            ));
        }

        if err.is_closed() {
            return Error::ConnectionError(err.to_string());
        }

        Error::DatabaseError(format!("{:?}", err))
    }
}

/// Convert deadpool errors to store errors
impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Error::PoolError(err.to_string())
    }
}

/// Convert deadpool build errors to store errors
impl From<deadpool_postgres::BuildError> for Error {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        Error::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ValidationError(format!("JSON error: {}", err))
    }
}
