use resilience::TimeoutError;
use s3_utils::S3Error;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

/// Deploy pipeline errors
///
/// Invalidation failures are not listed here: once every upload succeeded the
/// deploy is reported as successful and a failed purge is recorded as
/// `InvalidationOutcome::Deferred` in the report.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Upload failed for {failed} of {total} files (first: {key}): {source}")]
    Upload {
        failed: usize,
        total: usize,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Invalid asset path {0:?}")]
    InvalidPath(String),

    #[error("Snapshot has no root document {0:?}")]
    MissingRootDocument(String),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Origin storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("Storage request timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Request { retryable, .. } => *retryable,
            StorageError::Timeout(_) => true,
        }
    }
}

impl From<S3Error> for StorageError {
    fn from(err: S3Error) -> Self {
        StorageError::Request {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<TimeoutError> for StorageError {
    fn from(err: TimeoutError) -> Self {
        StorageError::Timeout(err.0)
    }
}

/// Edge cache invalidation errors
#[derive(Debug, Error)]
pub enum EdgeCacheError {
    #[error("Invalidation request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("Invalidation request rejected: {0}")]
    InvalidRequest(String),

    #[error("Invalidation request timed out after {0:?}")]
    Timeout(Duration),
}

impl EdgeCacheError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EdgeCacheError::Request { retryable, .. } => *retryable,
            EdgeCacheError::InvalidRequest(_) => false,
            EdgeCacheError::Timeout(_) => true,
        }
    }
}

impl From<TimeoutError> for EdgeCacheError {
    fn from(err: TimeoutError) -> Self {
        EdgeCacheError::Timeout(err.0)
    }
}

/// Deploy identity errors
#[derive(Debug, Error)]
pub enum TrustError {
    /// Permanent for this subject/audience pair; never retried
    #[error("Authorization denied for subject {subject:?} (audience {audience:?})")]
    AuthorizationDenied { subject: String, audience: String },

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Credential issuer failed: {message}")]
    Issuer { message: String, retryable: bool },

    #[error("Credential issuer timed out after {0:?}")]
    Timeout(Duration),
}

impl TrustError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TrustError::Issuer { retryable, .. } => *retryable,
            TrustError::Timeout(_) => true,
            TrustError::AuthorizationDenied { .. } | TrustError::InvalidToken(_) => false,
        }
    }
}

impl From<TimeoutError> for TrustError {
    fn from(err: TimeoutError) -> Self {
        TrustError::Timeout(err.0)
    }
}
