use thiserror::Error;

use crate::storage::store::StoreError;

/// Caller-visible result taxonomy. The routing layer maps these straight
/// to status codes; `Ok` stands for success.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The referenced group or membership does not exist.
    #[error("not found")]
    NotFound,
    /// Capacity exceeded, oversized message, or malformed input.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The store rejected a write on the primary data path.
    #[error("server error: {0}")]
    ServerError(String),
}

impl ServiceError {
    pub fn server(err: impl std::fmt::Display) -> Self {
        ServiceError::ServerError(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableNotFound | StoreError::RowNotFound => ServiceError::NotFound,
            other => ServiceError::ServerError(other.to_string()),
        }
    }
}
