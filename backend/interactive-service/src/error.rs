/// Error types for interactive-service
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the counter store and surfaced through the repository.
#[derive(Error, Debug)]
pub enum InteractiveError {
    #[error("Record not found")]
    NotFound,

    /// A step of a multi-write operation failed; the whole transaction was rolled back.
    #[error("Transaction {op} failed: {source}")]
    Transaction {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl InteractiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InteractiveError::NotFound)
    }

    /// Wraps a sqlx error raised inside the transaction named `op`.
    pub(crate) fn transaction(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| InteractiveError::Transaction { op, source }
    }
}

impl From<sqlx::Error> for InteractiveError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => InteractiveError::NotFound,
            other => InteractiveError::Database(other),
        }
    }
}

/// Errors from the counter cache. Never returned past the repository.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid cache data: {0}")]
    InvalidData(String),

    #[error("Cache operation timed out")]
    Timeout,
}

/// Errors from the read-event consumers.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Empty message payload")]
    EmptyPayload,

    #[error("Failed to decode read event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Read event handling timed out after {0:?}")]
    Timeout(Duration),

    #[error("Repository error: {0}")]
    Repository(#[from] InteractiveError),
}

/// Result type alias for store and repository operations
pub type InteractiveResult<T> = Result<T, InteractiveError>;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
