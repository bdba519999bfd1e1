//! Filesystem-backed blob store laid out as `{root}/{bucket}/{key}`.

use super::{
    BlobLocation, BlobStore, DeleteFailure, DeleteOutcome, StorageError, codes, ensure_batch_size,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Blob store rooted at a local directory. Buckets are first-level directories.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(StorageError::new(
                codes::INVALID_BUCKET_NAME,
                format!("bucket name '{bucket}' is not valid"),
            ));
        }
        Ok(self.root.join(bucket))
    }

    fn resolve(&self, location: &BlobLocation) -> Result<PathBuf, StorageError> {
        let bucket_dir = self.bucket_dir(&location.bucket)?;
        let key = Path::new(&location.key);
        let escapes = location.key.is_empty()
            || key
                .components()
                .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(StorageError::new(
                codes::ACCESS_DENIED,
                format!("key '{}' is outside the bucket", location.key),
            )
            .at(location));
        }
        Ok(bucket_dir.join(key))
    }
}

fn map_io(err: std::io::Error, location: &BlobLocation, bucket_exists: bool) -> StorageError {
    let code = match err.kind() {
        ErrorKind::NotFound if !bucket_exists => codes::NO_SUCH_BUCKET,
        ErrorKind::NotFound => codes::NO_SUCH_KEY,
        ErrorKind::PermissionDenied => codes::ACCESS_DENIED,
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            codes::SERVICE_UNAVAILABLE
        }
        _ => codes::IO_ERROR,
    };
    StorageError::new(code, err.to_string()).at(location)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                let bucket_exists = tokio::fs::try_exists(self.root.join(&location.bucket))
                    .await
                    .unwrap_or(false);
                Err(map_io(err, location, bucket_exists))
            }
        }
    }

    async fn write(&self, location: &BlobLocation, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| map_io(err, location, true))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| map_io(err, location, true))?;
        tracing::trace!(path = %path.display(), "Wrote blob");
        Ok(())
    }

    async fn delete(&self, locations: &[BlobLocation]) -> Result<DeleteOutcome, StorageError> {
        ensure_batch_size(locations)?;
        let mut outcome = DeleteOutcome::default();
        for location in locations {
            let path = match self.resolve(location) {
                Ok(path) => path,
                Err(err) => {
                    outcome.errors.push(DeleteFailure {
                        key: location.key.clone(),
                        code: err.code,
                        message: err.message,
                    });
                    continue;
                }
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => outcome.deleted.push(location.clone()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    outcome.deleted.push(location.clone());
                }
                Err(err) => {
                    let mapped = map_io(err, location, true);
                    outcome.errors.push(DeleteFailure {
                        key: location.key.clone(),
                        code: mapped.code,
                        message: mapped.message,
                    });
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_nested_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());
        let location = BlobLocation::new("docs", "chunks/doc-1/doc-1_chunk_0.pdf");

        store
            .write(&location, b"%PDF-1.5".to_vec())
            .await
            .expect("write");
        let bytes = store.read(&location).await.expect("read");
        assert_eq!(bytes, b"%PDF-1.5");
        assert!(dir.path().join("docs/chunks/doc-1/doc-1_chunk_0.pdf").exists());
    }

    #[tokio::test]
    async fn missing_bucket_and_key_map_to_distinct_codes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());

        let err = store
            .read(&BlobLocation::new("absent", "file.pdf"))
            .await
            .expect_err("missing bucket");
        assert_eq!(err.code, codes::NO_SUCH_BUCKET);

        std::fs::create_dir_all(dir.path().join("present")).expect("bucket dir");
        let err = store
            .read(&BlobLocation::new("present", "file.pdf"))
            .await
            .expect_err("missing key");
        assert_eq!(err.code, codes::NO_SUCH_KEY);
    }

    #[tokio::test]
    async fn rejects_bad_bucket_names_and_escaping_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());

        let err = store
            .write(&BlobLocation::new("a/b", "k"), vec![])
            .await
            .expect_err("bad bucket");
        assert_eq!(err.code, codes::INVALID_BUCKET_NAME);

        let err = store
            .write(&BlobLocation::new("docs", "../escape.pdf"), vec![])
            .await
            .expect_err("escaping key");
        assert_eq!(err.code, codes::ACCESS_DENIED);
    }

    #[tokio::test]
    async fn delete_treats_absent_objects_as_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsBlobStore::new(dir.path());
        let present = BlobLocation::new("docs", "a.pdf");
        let absent = BlobLocation::new("docs", "b.pdf");
        store.write(&present, vec![1, 2, 3]).await.expect("write");

        let outcome = store
            .delete(&[present.clone(), absent.clone()])
            .await
            .expect("delete");
        assert_eq!(outcome.deleted, vec![present.clone(), absent]);
        assert!(outcome.errors.is_empty());
        assert!(!dir.path().join("docs/a.pdf").exists());
    }
}
