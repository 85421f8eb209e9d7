use crate::services::object_storage::StorageError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid filename: {0}")]
    InvalidFilename(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
