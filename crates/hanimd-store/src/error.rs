//! Error types for the hanimd-store crate.
//!
//! Drivers return [`StoreError`] via [`StoreResult`]. The entity stores never
//! hand these to callers: every fault is logged and collapsed into the
//! operation's neutral value at the [`Connection`](crate::Connection)
//! boundary.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur inside a storage driver.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MongoDB client or server error.
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A document could not be converted to BSON.
    #[error("bson error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The connection string names a backend this crate cannot open.
    #[error("unsupported connection string: {0}")]
    Unsupported(String),

    /// The driver rejected or failed the operation.
    #[error("driver error: {0}")]
    Driver(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
