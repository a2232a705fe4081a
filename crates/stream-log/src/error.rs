use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stream call did not complete within {0:?}")]
    Timeout(Duration),
}

pub type StreamResult<T> = Result<T, StreamError>;
