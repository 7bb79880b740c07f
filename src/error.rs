//! Error types for the storage orchestration layer
//!
//! Provides structured error types for every store (cache, durable, blob)
//! and for the services layered on top of them (monitoring, backup, migration).

use thiserror::Error;

/// Unified error type for the storage layer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Durable Store Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid record in {table}: {reason}")]
    InvalidRecord { table: String, reason: String },

    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: String },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    #[error("Cache {operation} failed: {reason}")]
    Cache { operation: String, reason: String },

    // =========================================================================
    // Blob Store Errors
    // =========================================================================
    #[error("Blob not found: {key}")]
    BlobNotFound { key: String },

    #[error("Blob backend {operation} failed for {key}: {reason}")]
    BlobBackend {
        operation: String,
        key: String,
        reason: String,
    },

    #[error("Invalid blob key: {0}")]
    InvalidBlobKey(String),

    // =========================================================================
    // Backup / Migration Errors
    // =========================================================================
    #[error("Corrupt backup {key}: {reason}")]
    CorruptBackup { key: String, reason: String },

    #[error("Migration from {from} to {to} failed: {reason}")]
    MigrationFailed {
        from: String,
        to: String,
        reason: String,
    },

    // =========================================================================
    // Upstream / Notification Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream probe failed: {0}")]
    Upstream(String),

    #[error("Operation timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy used by callers to decide how to surface a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, timeout or backend unavailability
    Transient,
    /// Missing tenant or blob
    NotFound,
    /// Malformed input, corrupt backup, unparseable column
    Validation,
    /// Cross-store disagreement surfaced by verification
    Consistency,
    /// Everything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(e) => match e {
                sqlx::Error::RowNotFound => ErrorKind::NotFound,
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => ErrorKind::Transient,
                _ => ErrorKind::Internal,
            },
            Error::Http(_)
            | Error::Upstream(_)
            | Error::Timeout { .. }
            | Error::Cache { .. }
            | Error::BlobBackend { .. }
            | Error::Io(_) => ErrorKind::Transient,

            Error::TenantNotFound { .. } | Error::BlobNotFound { .. } => ErrorKind::NotFound,

            Error::Validation(_)
            | Error::Configuration(_)
            | Error::InvalidRecord { .. }
            | Error::InvalidBlobKey(_)
            | Error::CorruptBackup { .. }
            | Error::Json(_)
            | Error::Yaml(_) => ErrorKind::Validation,

            Error::MigrationFailed { .. } => ErrorKind::Consistency,

            Error::Internal(_) | Error::Prometheus(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Internal)
    }

    /// Check if this error is a not-found condition
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Short stable label for metric tags
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Transient => "transient",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Result type alias for the storage layer
pub type Result<T> = std::result::Result<T, Error>;
