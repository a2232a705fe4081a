use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("dlq event {0} not found")]
    NotFound(Uuid),
    #[error("dlq event {0} is not parked (currently {1}); concurrent operator action?")]
    NotParked(Uuid, String),
    #[error("republish failed: {0}")]
    RepublishFailed(String),
}

pub type DlqResult<T> = Result<T, DlqError>;
