//! Physical splitting of a document into persisted chunk artifacts.
//!
//! Splitting runs in two stages. The first is a pure pass over the boundaries: every page is
//! checked individually, the per-page outcomes are folded into copied/skipped tallies, and
//! each surviving range is rendered into a standalone PDF. The second stage persists the
//! rendered chunks through the retry policy, with up to `max_concurrency` writes in flight.

use super::boundaries::{ChunkBoundary, FinalizeReason};
use super::errors::{ChunkingError, classify_storage_error};
use super::pdf::{PdfDocument, run_blocking};
use super::retry::RetryPolicy;
use super::tokens::TokenProfile;
use crate::storage::{BlobLocation, BlobStore};
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Number of skipped page numbers echoed in logs and error details.
const SKIPPED_PAGE_PREVIEW: usize = 10;

/// One persisted chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkArtifact {
    /// `{documentId}_chunk_{chunkIndex}`.
    pub chunk_id: String,
    /// Index of the boundary this chunk was cut from.
    pub chunk_index: usize,
    /// Number of boundaries planned for the document.
    pub total_chunks: usize,
    /// First page of the boundary (0-based).
    pub start_page: usize,
    /// Last page of the boundary (0-based, inclusive).
    pub end_page: usize,
    /// Pages actually copied into the chunk.
    pub page_count: usize,
    /// Sum of page token estimates over the boundary.
    pub estimated_tokens: u64,
    /// Where the chunk was written.
    #[serde(flatten)]
    pub location: BlobLocation,
    /// Hex SHA-256 of the chunk bytes.
    pub content_sha256: String,
    /// Hybrid finalize reason, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_reason: Option<FinalizeReason>,
}

/// Result of splitting one document.
#[derive(Debug, Clone, Default)]
pub struct SplitReport {
    /// Persisted chunks in boundary order.
    pub artifacts: Vec<ChunkArtifact>,
    /// Pages that could not be copied (0-based, ascending, may repeat across overlaps).
    pub skipped_pages: Vec<usize>,
    /// Boundaries dropped because none of their pages survived.
    pub dropped_chunks: Vec<usize>,
}

/// Copied and skipped pages of one boundary.
#[derive(Debug, Default, PartialEq, Eq)]
struct PageTally {
    copied: Vec<usize>,
    skipped: Vec<usize>,
}

fn tally(outcomes: &[(usize, Result<(), ChunkingError>)]) -> PageTally {
    outcomes
        .iter()
        .fold(PageTally::default(), |mut tally, (page, outcome)| {
            match outcome {
                Ok(()) => tally.copied.push(*page),
                Err(_) => tally.skipped.push(*page),
            }
            tally
        })
}

fn log_page_failures(
    document_id: &str,
    boundary: &ChunkBoundary,
    outcomes: &[(usize, Result<(), ChunkingError>)],
) {
    for (page, outcome) in outcomes {
        if let Err(error) = outcome {
            tracing::warn!(
                document_id,
                chunk_index = boundary.chunk_index,
                page,
                error = %error.message,
                "Skipping unreadable page"
            );
        }
    }
}

/// A rendered chunk waiting to be written.
struct RenderedChunk {
    boundary: ChunkBoundary,
    page_count: usize,
    bytes: Vec<u8>,
}

/// Check and copy the pages of every boundary into standalone PDFs.
fn render_chunks(
    document_id: &str,
    document: &PdfDocument,
    boundaries: &[ChunkBoundary],
) -> Result<(SplitReport, Vec<RenderedChunk>), ChunkingError> {
    let mut report = SplitReport::default();
    let mut rendered = Vec::with_capacity(boundaries.len());
    for boundary in boundaries {
        let outcomes: Vec<_> = (boundary.start_page..=boundary.end_page)
            .map(|page| (page, document.check_page(page)))
            .collect();
        log_page_failures(document_id, boundary, &outcomes);
        let PageTally { copied, skipped } = tally(&outcomes);
        report.skipped_pages.extend(skipped);

        if copied.is_empty() {
            tracing::warn!(
                document_id,
                chunk_index = boundary.chunk_index,
                start_page = boundary.start_page,
                end_page = boundary.end_page,
                "Dropping chunk with no readable pages"
            );
            report.dropped_chunks.push(boundary.chunk_index);
            continue;
        }

        let bytes = document.extract_pages(&copied)?;
        rendered.push(RenderedChunk {
            boundary: boundary.clone(),
            page_count: copied.len(),
            bytes,
        });
    }
    report.skipped_pages.sort_unstable();

    if rendered.is_empty() {
        let preview: Vec<usize> = report
            .skipped_pages
            .iter()
            .copied()
            .take(SKIPPED_PAGE_PREVIEW)
            .collect();
        return Err(ChunkingError::corrupted(
            "No chunks could be created; every page failed to copy",
        )
        .with_detail("corruptedPages", preview)
        .with_detail("corruptedPageCount", report.skipped_pages.len())
        .with_detail("totalPages", document.page_count()));
    }
    Ok((report, rendered))
}

/// Cuts documents along chunk boundaries and stores the pieces.
pub struct DocumentSplitter {
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    bucket: String,
    prefix: String,
    max_concurrency: usize,
}

impl DocumentSplitter {
    /// Write chunks to `bucket` under `{prefix}/{documentId}/`.
    pub fn new(
        store: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            retry: RetryPolicy::storage_writes(),
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            max_concurrency: 1,
        }
    }

    /// Override the write retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Allow up to `max_concurrency` chunk writes in flight.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Storage location of chunk `chunk_id` of `document_id`.
    pub fn chunk_location(&self, document_id: &str, chunk_id: &str) -> BlobLocation {
        let key = if self.prefix.is_empty() {
            format!("{document_id}/{chunk_id}.pdf")
        } else {
            format!("{}/{document_id}/{chunk_id}.pdf", self.prefix)
        };
        BlobLocation::new(self.bucket.clone(), key)
    }

    /// Parse `bytes` and split them along `boundaries`.
    pub async fn split(
        &self,
        document_id: &str,
        bytes: &[u8],
        boundaries: &[ChunkBoundary],
        profile: &TokenProfile,
    ) -> Result<SplitReport, ChunkingError> {
        let owned = bytes.to_vec();
        let document = run_blocking("parse_document", move || PdfDocument::parse(&owned))
            .await
            .map_err(|err| err.with_document(document_id))?;
        self.split_document(document_id, Arc::new(document), boundaries, profile)
            .await
    }

    /// Split an already parsed document along `boundaries`.
    ///
    /// Rendering runs on the blocking pool; writes start once every chunk is rendered.
    pub async fn split_document(
        &self,
        document_id: &str,
        document: Arc<PdfDocument>,
        boundaries: &[ChunkBoundary],
        profile: &TokenProfile,
    ) -> Result<SplitReport, ChunkingError> {
        if document.page_count() != profile.total_pages {
            tracing::warn!(
                document_id,
                parsed_pages = document.page_count(),
                profiled_pages = profile.total_pages,
                "Page count mismatch between document and token profile"
            );
        }

        let task_id = document_id.to_string();
        let task_boundaries = boundaries.to_vec();
        let (mut report, rendered) = run_blocking("render_chunks", move || {
            render_chunks(&task_id, &document, &task_boundaries)
        })
        .await
        .map_err(|err| err.with_document(document_id))?;

        let total_chunks = boundaries.len();
        report.artifacts = stream::iter(rendered)
            .map(|chunk| self.persist(document_id, chunk, total_chunks, profile))
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        tracing::info!(
            document_id,
            chunks = report.artifacts.len(),
            planned = total_chunks,
            pages_skipped = report.skipped_pages.len(),
            "Document split"
        );
        Ok(report)
    }

    async fn persist(
        &self,
        document_id: &str,
        chunk: RenderedChunk,
        total_chunks: usize,
        profile: &TokenProfile,
    ) -> Result<ChunkArtifact, ChunkingError> {
        let RenderedChunk {
            boundary,
            page_count,
            bytes,
        } = chunk;
        let chunk_id = format!("{document_id}_chunk_{}", boundary.chunk_index);
        let location = self.chunk_location(document_id, &chunk_id);
        let content_sha256 = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len();

        let store = &self.store;
        let target = &location;
        self.retry
            .run("write_chunk", || {
                let payload = bytes.clone();
                async move {
                    store
                        .write(target, payload)
                        .await
                        .map_err(|err| classify_storage_error(&err))
                }
            })
            .await
            .map_err(|err| {
                err.with_document(document_id)
                    .with_detail("chunkIndex", boundary.chunk_index)
            })?;
        tracing::debug!(
            document_id,
            chunk_index = boundary.chunk_index,
            key = %location.key,
            bytes = size,
            "Chunk persisted"
        );

        Ok(ChunkArtifact {
            chunk_id,
            chunk_index: boundary.chunk_index,
            total_chunks,
            start_page: boundary.start_page,
            end_page: boundary.end_page,
            page_count,
            estimated_tokens: profile.tokens_in_range(boundary.start_page, boundary.end_page),
            location,
            content_sha256,
            finalize_reason: boundary.finalize_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::boundaries::fixed_pages;
    use crate::processing::errors::ErrorKind;
    use crate::processing::pdf::fixtures::{numbered_pdf, pdf_with_pages};
    use crate::storage::{MemoryBlobStore, StorageError, codes};
    use std::time::Duration;

    fn splitter(store: Arc<MemoryBlobStore>) -> DocumentSplitter {
        DocumentSplitter::new(store, "output", "chunks").with_retry(
            RetryPolicy::storage_writes()
                .with_delays(Duration::from_millis(1), Duration::from_millis(2))
                .without_jitter(),
        )
    }

    #[tokio::test]
    async fn writes_one_artifact_per_boundary() {
        let store = Arc::new(MemoryBlobStore::new());
        let bytes = numbered_pdf(6);
        let boundaries = fixed_pages(6, 2, 0).expect("boundaries");
        let profile = TokenProfile::from_page_tokens(vec![5, 5, 5, 5, 5, 7]);

        let report = splitter(store.clone())
            .with_max_concurrency(4)
            .split("doc-1", &bytes, &boundaries, &profile)
            .await
            .expect("split");

        assert_eq!(report.artifacts.len(), 3);
        let last = &report.artifacts[2];
        assert_eq!(last.chunk_id, "doc-1_chunk_2");
        assert_eq!(last.total_chunks, 3);
        assert_eq!(last.page_count, 2);
        assert_eq!(last.estimated_tokens, 12);
        assert_eq!(last.location.key, "chunks/doc-1/doc-1_chunk_2.pdf");

        let stored = store.get(&last.location).await.expect("stored chunk");
        assert_eq!(hex::encode(Sha256::digest(&stored)), last.content_sha256);
        assert_eq!(PdfDocument::parse(&stored).expect("chunk").page_count(), 2);
    }

    #[tokio::test]
    async fn unreadable_pages_are_skipped_and_empty_chunks_dropped() {
        let store = Arc::new(MemoryBlobStore::new());
        let bytes = pdf_with_pages(&["a", "b", "c", "d", "e", "f"], &[0, 1, 4]);
        let boundaries = fixed_pages(6, 2, 0).expect("boundaries");
        let profile = TokenProfile::from_page_tokens(vec![1; 6]);

        let report = splitter(store.clone())
            .split("doc-2", &bytes, &boundaries, &profile)
            .await
            .expect("split");

        assert_eq!(report.dropped_chunks, vec![0]);
        assert_eq!(report.skipped_pages, vec![0, 1, 4]);
        let indexes: Vec<_> = report.artifacts.iter().map(|a| a.chunk_index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(report.artifacts[1].page_count, 1);
        assert!(report.artifacts.iter().all(|a| a.total_chunks == 3));
        assert_eq!(store.locations().await.len(), 2);
    }

    #[tokio::test]
    async fn all_pages_unreadable_is_corruption() {
        let store = Arc::new(MemoryBlobStore::new());
        let bytes = pdf_with_pages(&["a", "b"], &[0, 1]);
        let boundaries = fixed_pages(2, 1, 0).expect("boundaries");
        let profile = TokenProfile::from_page_tokens(vec![0, 0]);

        let err = splitter(store)
            .split("doc-3", &bytes, &boundaries, &profile)
            .await
            .expect_err("nothing to write");
        assert_eq!(err.kind, ErrorKind::CorruptedFormat);
        assert_eq!(err.document_id.as_deref(), Some("doc-3"));
        assert_eq!(err.details["corruptedPages"], serde_json::json!([0, 1]));
    }

    #[tokio::test]
    async fn throttled_writes_are_retried() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .fail_next_writes([
                StorageError::new(codes::SLOW_DOWN, "slow down"),
                StorageError::new(codes::SERVICE_UNAVAILABLE, "busy"),
            ])
            .await;
        let boundaries = fixed_pages(2, 2, 0).expect("boundaries");
        let profile = TokenProfile::from_page_tokens(vec![1, 1]);

        let report = splitter(store.clone())
            .split("doc-4", &numbered_pdf(2), &boundaries, &profile)
            .await
            .expect("split after retries");
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(store.write_attempts(), 3);
    }

    #[tokio::test]
    async fn access_denied_aborts_without_retry() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .fail_next_writes([StorageError::new(codes::ACCESS_DENIED, "denied")])
            .await;
        let boundaries = fixed_pages(4, 2, 0).expect("boundaries");
        let profile = TokenProfile::from_page_tokens(vec![1; 4]);

        let err = splitter(store.clone())
            .split("doc-5", &numbered_pdf(4), &boundaries, &profile)
            .await
            .expect_err("denied");
        assert_eq!(err.kind, ErrorKind::StorageAccessDenied);
        assert_eq!(err.details["key"], "chunks/doc-5/doc-5_chunk_0.pdf");
        assert_eq!(err.details["chunkIndex"], 0);
        assert_eq!(store.write_attempts(), 1);
    }

    #[tokio::test]
    async fn rejects_non_pdf_input_before_parsing() {
        let store = Arc::new(MemoryBlobStore::new());
        let err = splitter(store)
            .split("doc-6", b"<html>nope</html>", &[], &TokenProfile::from_page_tokens(vec![]))
            .await
            .expect_err("html");
        assert_eq!(err.kind, ErrorKind::InvalidFormat);
        assert_eq!(err.details["detectedType"], "HTML");
    }

    #[test]
    fn tally_folds_outcomes() {
        let outcomes = vec![
            (3, Ok(())),
            (4, Err(ChunkingError::corrupted("bad"))),
            (5, Ok(())),
        ];
        assert_eq!(
            tally(&outcomes),
            PageTally {
                copied: vec![3, 5],
                skipped: vec![4],
            }
        );
    }

    #[test]
    fn empty_prefix_keys_by_document() {
        let splitter = DocumentSplitter::new(Arc::new(MemoryBlobStore::new()), "b", "/");
        assert_eq!(splitter.chunk_location("d", "d_chunk_0").key, "d/d_chunk_0.pdf");
    }
}
