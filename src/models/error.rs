//! Defines basic error and result types used throughout the crate.

use std::{error::Error, fmt};

use redis::RedisError;

/// Result type used throughout the crate.
pub type QubeResult<T> = Result<T, QubeError>;

/// Error type used throughout the crate.
#[derive(Debug)]
pub enum QubeError {
    /// Error occurred during interaction with Redis.
    Redis(RedisError),

    /// Error occurred while trying to get a pooled connection to Redis.
    Pool(String),

    /// Operation attempted on a job that does not exist.
    NoSuchJob(u64),

    /// Operation attempted before `init` completed.
    NotReady,

    /// Parsing of some data structure failed. Typically used when parsing JSON.
    Parse(String),

    /// Internal error, e.g. a worker task that could not be spawned or joined.
    Internal(String),
}

impl From<RedisError> for QubeError {
    fn from(err: RedisError) -> Self {
        QubeError::Redis(err)
    }
}

impl From<serde_json::Error> for QubeError {
    fn from(err: serde_json::Error) -> Self {
        QubeError::Parse(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for QubeError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        QubeError::Pool(err.to_string())
    }
}

impl From<deadpool_redis::CreatePoolError> for QubeError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        QubeError::Pool(err.to_string())
    }
}

impl fmt::Display for QubeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QubeError::Redis(err) => err.fmt(f),
            QubeError::Pool(msg) => write!(f, "Failed to get Redis connection: {}", msg),
            QubeError::NoSuchJob(job_id) => write!(f, "Job with ID {} does not exist", job_id),
            QubeError::NotReady => write!(f, "Client not initialised, call init() first"),
            QubeError::Parse(msg) => write!(f, "Parse error: {}", msg),
            QubeError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for QubeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            QubeError::Redis(err) => err.source(),
            _ => None,
        }
    }
}
