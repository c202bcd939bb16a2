//! Centralized error types for the webhook indexer

use axum::http::StatusCode;
use thiserror::Error;

/// Main indexer error type
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream provider error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Invalid state transition: {0}")]
    Conflict(String),

    #[error("Temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Target database error: {0}")]
    Target(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors from the upstream webhook provider
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Outbound rate limit not acquired within {0:?}")]
    Throttled(std::time::Duration),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

impl IndexerError {
    /// HTTP status this error surfaces as
    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexerError::Validation(_) | IndexerError::Serialization(_) => StatusCode::BAD_REQUEST,
            IndexerError::Auth(_) => StatusCode::UNAUTHORIZED,
            IndexerError::NotFound(_) => StatusCode::NOT_FOUND,
            IndexerError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            IndexerError::Conflict(_) => StatusCode::CONFLICT,
            IndexerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            IndexerError::Storage(_)
            | IndexerError::Internal(_)
            | IndexerError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to API callers
    pub fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "Upstream provider unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        IndexerError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        IndexerError::NotFound(msg.into())
    }
}

/// Helper to convert sqlx errors
impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => IndexerError::Storage(StorageError::PoolExhausted),
            other => IndexerError::Storage(StorageError::Database(other.to_string())),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for IndexerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        IndexerError::Storage(StorageError::MigrationFailed(err.to_string()))
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        IndexerError::Upstream(UpstreamError::Request(err.to_string()))
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        IndexerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_http_statuses() {
        assert_eq!(IndexerError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(IndexerError::Auth("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(IndexerError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(IndexerError::RateLimited("x".into()).status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(IndexerError::Unavailable("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            IndexerError::Storage(StorageError::PoolExhausted).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = IndexerError::Storage(StorageError::Database("relation \"jobs\" does not exist".into()));
        assert_eq!(err.public_message(), "Internal server error");

        let err = IndexerError::not_found("job 42");
        assert!(err.public_message().contains("job 42"));
    }
}
