//! Error types for the sync layer

use crate::region::Region;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Region {0} is not configured for replication")]
    UnconfiguredRegion(Region),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Invalid sync settings: {0}")]
    InvalidSettings(String),

    #[error("Region transfer failed: {0}")]
    Transfer(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures reported by the backend behind [`crate::remote::RemoteStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The device or the backend is unreachable. Writes that hit this are
    /// routed into the mutation queue instead of failing.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Record not found: {table}/{id}")]
    NotFound { table: String, id: String },
}

impl RemoteError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}
