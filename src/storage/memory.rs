//! In-process blob store with failure injection, used by tests and dry runs.

use super::{
    BlobLocation, BlobStore, DeleteFailure, DeleteOutcome, StorageError, codes, ensure_batch_size,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    objects: HashMap<BlobLocation, Vec<u8>>,
    read_failures: VecDeque<StorageError>,
    write_failures: VecDeque<StorageError>,
    rejected_deletes: HashMap<BlobLocation, StorageError>,
    failing_buckets: HashMap<String, StorageError>,
}

/// Map-backed [`BlobStore`].
#[derive(Default)]
pub struct MemoryBlobStore {
    state: Mutex<State>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub async fn insert(&self, location: BlobLocation, bytes: Vec<u8>) {
        self.state.lock().await.objects.insert(location, bytes);
    }

    /// Return a copy of a stored object.
    pub async fn get(&self, location: &BlobLocation) -> Option<Vec<u8>> {
        self.state.lock().await.objects.get(location).cloned()
    }

    /// All stored locations, sorted by bucket then key.
    pub async fn locations(&self) -> Vec<BlobLocation> {
        let mut locations: Vec<_> = self.state.lock().await.objects.keys().cloned().collect();
        locations.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key)));
        locations
    }

    /// Queue errors returned by the next reads, in order.
    pub async fn fail_next_reads(&self, errors: impl IntoIterator<Item = StorageError>) {
        self.state.lock().await.read_failures.extend(errors);
    }

    /// Queue errors returned by the next writes, in order.
    pub async fn fail_next_writes(&self, errors: impl IntoIterator<Item = StorageError>) {
        self.state.lock().await.write_failures.extend(errors);
    }

    /// Make deletes of one location fail with `error`.
    pub async fn reject_delete(&self, location: BlobLocation, error: StorageError) {
        self.state
            .lock()
            .await
            .rejected_deletes
            .insert(location, error);
    }

    /// Make every delete batch against `bucket` fail as a whole.
    pub async fn fail_delete_batches(&self, bucket: impl Into<String>, error: StorageError) {
        self.state
            .lock()
            .await
            .failing_buckets
            .insert(bucket.into(), error);
    }

    /// Number of read calls observed, including failed ones.
    pub fn read_attempts(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of write calls observed, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        if let Some(error) = state.read_failures.pop_front() {
            return Err(error.at(location));
        }
        state.objects.get(location).cloned().ok_or_else(|| {
            StorageError::new(codes::NO_SUCH_KEY, "The specified key does not exist.").at(location)
        })
    }

    async fn write(&self, location: &BlobLocation, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error.at(location));
        }
        state.objects.insert(location.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, locations: &[BlobLocation]) -> Result<DeleteOutcome, StorageError> {
        ensure_batch_size(locations)?;
        let mut state = self.state.lock().await;
        if let Some(bucket) = locations.first().map(|location| location.bucket.as_str())
            && let Some(error) = state.failing_buckets.get(bucket)
        {
            return Err(error.clone());
        }
        let mut outcome = DeleteOutcome::default();
        for location in locations {
            if let Some(error) = state.rejected_deletes.get(location) {
                outcome.errors.push(DeleteFailure {
                    key: location.key.clone(),
                    code: error.code.clone(),
                    message: error.message.clone(),
                });
                continue;
            }
            state.objects.remove(location);
            outcome.deleted.push(location.clone());
        }
        Ok(outcome)
    }
}
