use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type OutboxResult<T> = Result<T, OutboxError>;
