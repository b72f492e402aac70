//! Errors shared by the infrastructure crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
