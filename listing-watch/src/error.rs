//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A schedule that can never fire (non-positive interval, past one-shot start, ...).
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The collector could not produce a batch for a run.
    #[error("Collector failure: {0}")]
    CollectorFailure(String),

    #[error("Notification queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Every channel adapter failure surfaces as this variant.
    #[error("Delivery via {channel} failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    /// Internal wait signal from the rate limiter. Never reported as a delivery failure.
    #[error("Rate limited on {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_schedule(msg: impl Into<String>) -> Self {
        Self::InvalidSchedule(msg.into())
    }

    pub fn collector(msg: impl Into<String>) -> Self {
        Self::CollectorFailure(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn delivery(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_display() {
        let err = Error::delivery("dingtalk", "errcode 310000: sign not match");
        assert_eq!(
            err.to_string(),
            "Delivery via dingtalk failed: errcode 310000: sign not match"
        );
    }

    #[test]
    fn test_queue_full_display() {
        let err = Error::QueueFull { capacity: 1000 };
        assert!(err.to_string().contains("1000"));
    }
}
