//! Best-effort removal of chunk artifacts once a document has been aggregated.

use crate::storage::{BlobLocation, BlobStore, MAX_DELETE_BATCH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to delete the chunks of one document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    /// Owning document.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Chunks to remove; a serialized chunk artifact is accepted as-is.
    #[serde(default)]
    pub chunks: Vec<ChunkReference>,
}

/// Location of one chunk to delete.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReference {
    /// Bucket holding the chunk.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Chunk key.
    #[serde(default)]
    pub key: Option<String>,
    /// Chunk identifier, for logs only.
    #[serde(default)]
    pub chunk_id: Option<String>,
}

/// Outcome of a cleanup run. Never signals failure to the caller's workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    /// Owning document, echoed back.
    pub document_id: Option<String>,
    /// Number of chunks removed.
    pub deleted_chunks: usize,
    /// Human readable failures.
    pub errors: Vec<String>,
}

/// Delete every referenced chunk, grouped by bucket in batches of at most 1000 keys.
pub async fn cleanup_chunks(store: &dyn BlobStore, request: CleanupRequest) -> CleanupResponse {
    let CleanupRequest { document_id, chunks } = request;
    let respond = |deleted_chunks, errors| CleanupResponse {
        document_id: document_id.clone(),
        deleted_chunks,
        errors,
    };

    let Some(document) = document_id.as_deref().filter(|id| !id.is_empty()) else {
        tracing::error!("Cleanup request without documentId");
        return respond(0, vec!["Missing required field: documentId".to_string()]);
    };
    if chunks.is_empty() {
        tracing::info!(document_id = document, "No chunks to clean up");
        return respond(0, Vec::new());
    }

    let mut by_bucket: BTreeMap<String, Vec<BlobLocation>> = BTreeMap::new();
    for chunk in &chunks {
        match (chunk.bucket.as_deref(), chunk.key.as_deref()) {
            (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => by_bucket
                .entry(bucket.to_string())
                .or_default()
                .push(BlobLocation::new(bucket, key)),
            _ => tracing::warn!(
                document_id = document,
                chunk_id = chunk.chunk_id.as_deref().unwrap_or("unknown"),
                "Chunk reference without bucket or key"
            ),
        }
    }
    if by_bucket.is_empty() {
        return respond(0, vec!["No valid chunk keys found".to_string()]);
    }

    let mut deleted = 0;
    let mut errors = Vec::new();
    for (bucket, locations) in &by_bucket {
        for batch in locations.chunks(MAX_DELETE_BATCH) {
            match store.delete(batch).await {
                Ok(outcome) => {
                    deleted += outcome.deleted.len();
                    for failure in outcome.errors {
                        tracing::warn!(
                            document_id = document,
                            key = %failure.key,
                            code = %failure.code,
                            "Failed to delete chunk"
                        );
                        errors.push(format!(
                            "Failed to delete {}: {} - {}",
                            failure.key, failure.code, failure.message
                        ));
                    }
                }
                Err(error) => {
                    tracing::error!(
                        document_id = document,
                        bucket = %bucket,
                        keys = batch.len(),
                        error = %error,
                        "Batch delete failed"
                    );
                    errors.push(format!(
                        "Batch delete failed for bucket {bucket}: {} - {}",
                        error.code, error.message
                    ));
                }
            }
        }
    }

    tracing::info!(
        document_id = document,
        deleted,
        errors = errors.len(),
        "Chunk cleanup finished"
    );
    respond(deleted, errors)
}
