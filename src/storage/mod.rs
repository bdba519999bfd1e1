//! Blob storage abstraction used for source documents and chunk artifacts.
//!
//! Every backend speaks in bucket/key locations and reports failures through [`StorageError`],
//! whose `code` mirrors the object-store error codes the classification layer understands
//! (`AccessDenied`, `NoSuchKey`, `SlowDown`, ...).

mod fs;
mod http;
mod memory;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;

use crate::config::{Config, StorageBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Maximum number of locations accepted by a single [`BlobStore::delete`] call.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Object-store error codes produced by the bundled backends.
pub mod codes {
    /// Caller is not allowed to touch the object.
    pub const ACCESS_DENIED: &str = "AccessDenied";
    /// Object does not exist.
    pub const NO_SUCH_KEY: &str = "NoSuchKey";
    /// Bucket does not exist.
    pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
    /// Bucket name is malformed.
    pub const INVALID_BUCKET_NAME: &str = "InvalidBucketName";
    /// Backend asked the caller to back off.
    pub const SLOW_DOWN: &str = "SlowDown";
    /// Backend failed internally.
    pub const INTERNAL_ERROR: &str = "InternalError";
    /// Backend is temporarily unavailable.
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
    /// Transport failed before a response was received.
    pub const NETWORK_ERROR: &str = "NetworkError";
    /// Local I/O failure with no better mapping.
    pub const IO_ERROR: &str = "IoError";
}

/// Bucket plus key pair identifying one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocation {
    /// Bucket (or top-level namespace) holding the object.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
}

impl BlobLocation {
    /// Build a location from any string-like bucket and key.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Failure reported by a blob store backend.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StorageError {
    /// Object-store error code (see [`codes`]).
    pub code: String,
    /// Human readable description.
    pub message: String,
    /// Location the failing call targeted, when known.
    pub location: Option<BlobLocation>,
}

impl StorageError {
    /// Build an error for the given code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    /// Attach the location the failing operation targeted.
    pub fn at(mut self, location: &BlobLocation) -> Self {
        self.location = Some(location.clone());
        self
    }
}

/// A single key that could not be removed during a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Key that failed.
    pub key: String,
    /// Backend error code.
    pub code: String,
    /// Backend error message.
    pub message: String,
}

/// Result of a batch delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Locations removed (or already absent).
    pub deleted: Vec<BlobLocation>,
    /// Per-key failures.
    pub errors: Vec<DeleteFailure>,
}

/// Narrow blob source used by the chunking pipeline.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of an object.
    async fn read(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite an object.
    async fn write(&self, location: &BlobLocation, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Remove up to [`MAX_DELETE_BATCH`] objects.
    ///
    /// An `Err` means the batch as a whole failed; per-key failures are reported in the outcome.
    async fn delete(&self, locations: &[BlobLocation]) -> Result<DeleteOutcome, StorageError>;
}

/// Build the blob store selected by the process configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.storage_backend {
        StorageBackend::Fs => {
            tracing::debug!(root = %config.storage_root.display(), "Using filesystem blob store");
            Ok(Arc::new(FsBlobStore::new(&config.storage_root)))
        }
        StorageBackend::Http => {
            let url = config.storage_url.as_deref().ok_or_else(|| {
                StorageError::new(codes::NETWORK_ERROR, "DOCSPLIT_STORAGE_URL is not set")
            })?;
            tracing::debug!(url, "Using HTTP blob store");
            Ok(Arc::new(HttpBlobStore::new(url)?))
        }
    }
}

pub(crate) fn ensure_batch_size(locations: &[BlobLocation]) -> Result<(), StorageError> {
    if locations.len() > MAX_DELETE_BATCH {
        return Err(StorageError::new(
            "MalformedXML",
            format!(
                "batch of {} keys exceeds the limit of {MAX_DELETE_BATCH}",
                locations.len()
            ),
        ));
    }
    Ok(())
}
