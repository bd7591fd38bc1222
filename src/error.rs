//! Typed error kinds for the engine (§7 of the design).
//!
//! `StoreTransient` is intentionally not a variant here: the store gateway
//! retries it internally (§4.1) and only surfaces `StoreUnavailable` once
//! its retry budget is exhausted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store unavailable after retry budget exhausted: {0}")]
    StoreUnavailable(String),

    #[error("kafka error: {0}")]
    LogFatal(#[from] rdkafka::error::KafkaError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::StoreUnavailable(err.to_string())
    }
}

impl From<mobc::Error<redis::RedisError>> for EngineError {
    fn from(err: mobc::Error<redis::RedisError>) -> Self {
        EngineError::StoreUnavailable(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
