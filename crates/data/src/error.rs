use thiserror::Error;

/// Errors returned by state stores and config feeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record changed between read and conditional write.
    #[error("write conflict on {key}")]
    Conflict { key: String },
    /// Optimistic retries ran out.
    #[error("gave up on {key} after {attempts} conflicting attempts")]
    Contention { key: String, attempts: u32 },
    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A stored value could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
