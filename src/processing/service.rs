//! Chunking service coordinating analysis, splitting, aggregation and cleanup.

use crate::{
    config::Config,
    metrics::{ChunkingMetrics, MetricsSnapshot},
    processing::{
        aggregate::{AggregatedResult, aggregate_results},
        boundaries::{ChunkBoundary, calculate_boundaries},
        cleanup::{CleanupRequest, CleanupResponse, cleanup_chunks},
        errors::{ChunkingError, classify_storage_error},
        pdf::{PdfDocument, run_blocking},
        retry::RetryPolicy,
        settings::{ChunkingConfig, ChunkingOverrides},
        splitter::DocumentSplitter,
        strategy::{StrategySelection, select_strategy},
        tokens::{TokenProfile, analyze_pages},
        types::{AggregationRequest, AnalysisRequest, AnalysisResponse, ChunkedAnalysis, TokenAnalysis},
    },
    storage::{BlobLocation, BlobStore},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Corrupted page numbers included in the per-document summary log.
const CORRUPTED_PAGE_PREVIEW: usize = 10;

/// Abstraction over the chunking pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait ChunkingApi: Send + Sync {
    /// Analyze one document and split it when it exceeds the configured thresholds.
    ///
    /// Failures are folded into the response rather than returned.
    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResponse;

    /// Fold per-chunk results into one document-level verdict.
    async fn aggregate(&self, request: AggregationRequest) -> Result<AggregatedResult, ChunkingError>;

    /// Remove chunk artifacts, collecting failures instead of raising them.
    async fn cleanup(&self, request: CleanupRequest) -> CleanupResponse;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Token profile, threshold decision and boundaries computed for one parsed document.
pub struct DocumentPlan {
    /// Parsed document.
    pub document: PdfDocument,
    /// Per-page token estimates.
    pub profile: TokenProfile,
    /// Threshold decision.
    pub selection: StrategySelection,
    /// Planned chunks; empty when chunking is not required.
    pub boundaries: Vec<ChunkBoundary>,
}

/// Parse `bytes` once and work out whether and where the document should be cut.
pub fn plan_document(bytes: &[u8], config: &ChunkingConfig) -> Result<DocumentPlan, ChunkingError> {
    let document = PdfDocument::parse(bytes)?;
    let profile = analyze_pages(&document);
    let selection = select_strategy(profile.total_pages, profile.total_tokens, config);
    let boundaries = if selection.requires_chunking {
        calculate_boundaries(config, &profile)?
    } else {
        Vec::new()
    };
    Ok(DocumentPlan {
        document,
        profile,
        selection,
        boundaries,
    })
}

/// Coordinates the document pipeline: token analysis, strategy selection, splitting and
/// persistence, plus result aggregation and chunk cleanup.
///
/// The service owns the blob store handle, the deployment defaults and the metrics registry.
/// Construct it once near process start and share it through an `Arc`.
pub struct ChunkingService {
    store: Arc<dyn BlobStore>,
    defaults: ChunkingConfig,
    env_overrides: ChunkingOverrides,
    retry: RetryPolicy,
    chunk_bucket: Option<String>,
    chunk_prefix: String,
    metrics: Arc<ChunkingMetrics>,
}

impl ChunkingService {
    /// Service over `store` with built-in defaults and chunks written next to their source.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            defaults: ChunkingConfig::default(),
            env_overrides: ChunkingOverrides::default(),
            retry: RetryPolicy::storage_writes(),
            chunk_bucket: None,
            chunk_prefix: "chunks".to_string(),
            metrics: Arc::new(ChunkingMetrics::new()),
        }
    }

    /// Service configured from the process configuration.
    pub fn from_config(config: &Config, store: Arc<dyn BlobStore>) -> Self {
        Self::new(store)
            .with_env_overrides(config.chunking_env.clone())
            .with_retry(RetryPolicy::storage_writes().with_max_retries(config.storage_max_retries))
            .with_chunk_destination(config.chunk_bucket.clone(), config.chunk_prefix.clone())
    }

    /// Replace the built-in chunking defaults.
    pub fn with_defaults(mut self, defaults: ChunkingConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Deployment-level overrides applied before request overrides.
    pub fn with_env_overrides(mut self, overrides: ChunkingOverrides) -> Self {
        self.env_overrides = overrides;
        self
    }

    /// Retry policy for source reads and chunk writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Where chunks are written: `bucket` (the source bucket when `None`) under `prefix`.
    pub fn with_chunk_destination(mut self, bucket: Option<String>, prefix: impl Into<String>) -> Self {
        self.chunk_bucket = bucket;
        self.chunk_prefix = prefix.into();
        self
    }

    /// Effective configuration for a request: defaults, then environment, then request.
    pub fn resolve_config(&self, request: &ChunkingOverrides) -> Result<ChunkingConfig, ChunkingError> {
        let config = ChunkingConfig::merge(&self.defaults, &self.env_overrides, request);
        config.validate()?;
        Ok(config)
    }

    /// Analyze a document; errors are returned as a structured failure response.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResponse {
        let document_id = request.document_id.clone().filter(|id| !id.is_empty());
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "analyze",
            document_id = document_id.as_deref().unwrap_or("unknown"),
            %correlation_id
        );
        let started = Instant::now();

        async move {
            match self.run_analysis(request).await {
                Ok(response) => {
                    tracing::info!(
                        requires_chunking = response.requires_chunking(),
                        chunks = response.chunks().len(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Analysis completed"
                    );
                    response
                }
                Err(error) => {
                    self.metrics.record_failure();
                    tracing::error!(
                        kind = %error.kind,
                        recoverable = error.recoverable(),
                        error = %error.message,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Analysis failed"
                    );
                    AnalysisResponse::failed(document_id, &error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_analysis(&self, request: AnalysisRequest) -> Result<AnalysisResponse, ChunkingError> {
        let (document_id, source) = validate_request(&request)?;
        tracing::info!(
            bucket = %source.bucket,
            key = %source.key,
            source = request.source.as_deref().unwrap_or("unknown"),
            "Processing document"
        );
        let overrides = ChunkingOverrides::from_json(request.config.unwrap_or(Value::Null))
            .map_err(|err| err.with_document(&document_id))?;
        self.resolve_config(&overrides)
            .map_err(|err| err.with_document(&document_id))?;
        let bytes = self.read_source(&document_id, &source).await?;
        self.analyze_bytes(&document_id, &source, bytes, &overrides)
            .await
    }

    async fn read_source(&self, document_id: &str, source: &BlobLocation) -> Result<Vec<u8>, ChunkingError> {
        let store = &self.store;
        let bytes = self
            .retry
            .run("read_source", || async move {
                store
                    .read(source)
                    .await
                    .map_err(|err| classify_storage_error(&err))
            })
            .await
            .map_err(|err| err.with_document(document_id))?;
        tracing::debug!(bytes = bytes.len(), "Source document read");
        Ok(bytes)
    }

    /// Analyze already loaded bytes; chunks are written relative to `source`.
    pub async fn analyze_bytes(
        &self,
        document_id: &str,
        source: &BlobLocation,
        bytes: Vec<u8>,
        overrides: &ChunkingOverrides,
    ) -> Result<AnalysisResponse, ChunkingError> {
        let config = self
            .resolve_config(overrides)
            .map_err(|err| err.with_document(document_id))?;
        let plan_config = config.clone();
        let plan = run_blocking("plan_document", move || plan_document(&bytes, &plan_config))
            .await
            .map_err(|err| err.with_document(document_id))?;
        self.metrics.record_analysis(config.strategy);

        let DocumentPlan {
            document,
            profile,
            selection,
            boundaries,
        } = plan;
        if !selection.requires_chunking {
            return Ok(AnalysisResponse::direct(document_id, &profile, selection.reason));
        }

        let bucket = self
            .chunk_bucket
            .clone()
            .unwrap_or_else(|| source.bucket.clone());
        let splitter = DocumentSplitter::new(self.store.clone(), bucket, self.chunk_prefix.as_str())
            .with_retry(self.retry.clone())
            .with_max_concurrency(config.max_concurrency);
        let report = splitter
            .split_document(document_id, Arc::new(document), &boundaries, &profile)
            .await?;

        if !report.skipped_pages.is_empty() {
            let preview: Vec<usize> = report
                .skipped_pages
                .iter()
                .copied()
                .take(CORRUPTED_PAGE_PREVIEW)
                .collect();
            tracing::warn!(
                corrupted_pages = ?preview,
                corrupted_page_count = report.skipped_pages.len(),
                dropped_chunks = ?report.dropped_chunks,
                total_pages = profile.total_pages,
                "Document has unreadable pages"
            );
        }
        self.metrics
            .record_split(report.artifacts.len() as u64, report.skipped_pages.len() as u64);

        Ok(AnalysisResponse::Chunked(ChunkedAnalysis {
            document_id: document_id.to_string(),
            requires_chunking: true,
            token_analysis: TokenAnalysis::detailed(&profile),
            strategy: config.strategy,
            chunks: report.artifacts,
            config: config.describe(profile.total_pages, profile.total_tokens),
            skipped_pages: report.skipped_pages,
        }))
    }

    /// Aggregate per-chunk results for one document.
    pub fn aggregate(&self, request: AggregationRequest) -> Result<AggregatedResult, ChunkingError> {
        let document_id = request
            .document_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChunkingError::invalid_request("Missing required field: documentId"))?;
        if let Some(strategy) = request.aggregation_strategy.as_deref()
            && strategy != "majority_vote"
        {
            tracing::warn!(
                document_id = %document_id,
                aggregation_strategy = strategy,
                "Unknown aggregation strategy; using majority_vote"
            );
        }
        let result = aggregate_results(&document_id, &request.chunk_results);
        self.metrics.record_aggregation(
            result.partial_result,
            result.chunks_summary.failed_chunks as u64,
        );
        Ok(result)
    }

    /// Delete chunk artifacts on a best-effort basis.
    pub async fn cleanup(&self, request: CleanupRequest) -> CleanupResponse {
        cleanup_chunks(self.store.as_ref(), request).await
    }

    /// Return the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Deadline helper used by callers that enforce one around [`Self::analyze`].
    pub fn timeout_response(document_id: Option<String>, limit: Duration) -> AnalysisResponse {
        let error = ChunkingError::timeout(limit.as_secs());
        AnalysisResponse::failed(document_id, &error)
    }
}

fn validate_request(request: &AnalysisRequest) -> Result<(String, BlobLocation), ChunkingError> {
    let document_id = request
        .document_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChunkingError::invalid_request("Missing required field: documentId"))?;
    let invalid = |message: String| ChunkingError::invalid_request(message).with_document(document_id);

    let (Some(bucket), Some(key)) = (
        request.source_location.bucket.as_deref().filter(|b| !b.is_empty()),
        request.source_location.key.as_deref().filter(|k| !k.is_empty()),
    ) else {
        return Err(invalid(
            "Missing required fields: content.bucket or content.key".to_string(),
        ));
    };
    if let Some(content_type) = request.content_type.as_deref()
        && content_type != "file"
    {
        return Err(invalid(format!(
            "Unsupported contentType: {content_type}. Only 'file' is supported."
        )));
    }
    if !key.to_lowercase().ends_with(".pdf") {
        tracing::warn!(
            bucket,
            key,
            "Source key has no .pdf extension; relying on the file signature"
        );
    }
    Ok((document_id.to_string(), BlobLocation::new(bucket, key)))
}

#[async_trait]
impl ChunkingApi for ChunkingService {
    async fn analyze(&self, request: AnalysisRequest) -> AnalysisResponse {
        ChunkingService::analyze(self, request).await
    }

    async fn aggregate(&self, request: AggregationRequest) -> Result<AggregatedResult, ChunkingError> {
        ChunkingService::aggregate(self, request)
    }

    async fn cleanup(&self, request: CleanupRequest) -> CleanupResponse {
        ChunkingService::cleanup(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        ChunkingService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::aggregate::ChunkResult;
    use crate::processing::cleanup::ChunkReference;
    use crate::processing::errors::ErrorKind;
    use crate::processing::pdf::fixtures::{encrypted_pdf, numbered_pdf, pdf_with_pages};
    use crate::storage::{MemoryBlobStore, StorageError, codes};
    use serde_json::json;

    async fn service_with(document: Vec<u8>) -> (ChunkingService, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .insert(BlobLocation::new("input", "docs/report.pdf"), document)
            .await;
        let service = ChunkingService::new(store.clone()).with_retry(
            RetryPolicy::storage_writes()
                .with_delays(Duration::from_millis(1), Duration::from_millis(2))
                .without_jitter(),
        );
        (service, store)
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new("doc-1", BlobLocation::new("input", "docs/report.pdf"))
    }

    fn fixed_pages_config() -> Value {
        json!({
            "strategy": "fixed-pages",
            "pageThreshold": 4,
            "chunkSize": 2,
            "overlapPages": 0
        })
    }

    #[tokio::test]
    async fn small_documents_are_not_chunked() {
        let (service, store) = service_with(numbered_pdf(3)).await;

        let response = service.analyze(request()).await;

        let AnalysisResponse::Direct(direct) = &response else {
            panic!("expected direct response, got {response:?}");
        };
        assert_eq!(direct.token_analysis.total_pages, 3);
        assert!(direct.reason.contains("below thresholds"));
        assert_eq!(store.locations().await.len(), 1);
        assert_eq!(service.metrics_snapshot().documents_analyzed, 1);
        assert_eq!(service.metrics_snapshot().strategy_usage.hybrid, 1);
    }

    #[tokio::test]
    async fn large_documents_are_split_next_to_their_source() {
        let (service, store) = service_with(numbered_pdf(6)).await;

        let response = service
            .analyze(request().with_config(fixed_pages_config()))
            .await;

        let AnalysisResponse::Chunked(chunked) = &response else {
            panic!("expected chunked response, got {response:?}");
        };
        assert_eq!(chunked.chunks.len(), 3);
        assert_eq!(chunked.config["chunkSize"], 2);
        assert_eq!(chunked.config["totalPages"], 6);
        assert_eq!(
            chunked.token_analysis.tokens_per_page.as_ref().map(Vec::len),
            Some(6)
        );
        let first = &chunked.chunks[0];
        assert_eq!(first.location.bucket, "input");
        assert_eq!(first.location.key, "chunks/doc-1/doc-1_chunk_0.pdf");
        assert_eq!(store.locations().await.len(), 4);

        let metrics = service.metrics_snapshot();
        assert_eq!(metrics.documents_chunked, 1);
        assert_eq!(metrics.chunks_created, 3);
        assert_eq!(metrics.strategy_usage.fixed_pages, 1);
    }

    #[tokio::test]
    async fn chunk_destination_override() {
        let (service, store) = service_with(numbered_pdf(6)).await;
        let service = service.with_chunk_destination(Some("scratch".into()), "split");

        let response = service
            .analyze(request().with_config(fixed_pages_config()))
            .await;

        assert_eq!(response.chunks()[2].location.bucket, "scratch");
        assert_eq!(response.chunks()[2].location.key, "split/doc-1/doc-1_chunk_2.pdf");
        assert!(
            store
                .get(&BlobLocation::new("scratch", "split/doc-1/doc-1_chunk_2.pdf"))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn unreadable_pages_are_reported() {
        let (service, _) =
            service_with(pdf_with_pages(&["a", "b", "c", "d", "e", "f"], &[3])).await;

        let response = service
            .analyze(request().with_config(fixed_pages_config()))
            .await;

        let body = serde_json::to_value(&response).expect("json");
        assert_eq!(body["requiresChunking"], true);
        assert_eq!(body["skippedPages"], json!([3]));
        assert_eq!(body["chunks"][1]["pageCount"], 1);
        assert_eq!(service.metrics_snapshot().pages_skipped, 1);
    }

    #[tokio::test]
    async fn invalid_requests_fail_without_reading() {
        let (service, store) = service_with(numbered_pdf(1)).await;

        let missing_id = service
            .analyze(AnalysisRequest {
                document_id: None,
                ..request()
            })
            .await;
        let error = missing_id.error().expect("error");
        assert_eq!(error.kind, ErrorKind::InvalidRequest);
        assert_eq!(error.message, "Missing required field: documentId");

        let wrong_type = service
            .analyze(AnalysisRequest {
                content_type: Some("url".into()),
                ..request()
            })
            .await;
        assert_eq!(
            wrong_type.error().map(|e| e.message.as_str()),
            Some("Unsupported contentType: url. Only 'file' is supported.")
        );

        let bad_config = service
            .analyze(request().with_config(json!({ "chunkSize": 5, "overlapPages": 5 })))
            .await;
        assert_eq!(
            bad_config.error().map(|e| e.kind),
            Some(ErrorKind::ConfigurationError)
        );

        assert_eq!(store.read_attempts(), 0);
        assert_eq!(service.metrics_snapshot().analysis_failures, 3);
    }

    #[tokio::test]
    async fn throttled_reads_are_retried() {
        let (service, store) = service_with(numbered_pdf(2)).await;
        store
            .fail_next_reads([StorageError::new(codes::SLOW_DOWN, "slow down")])
            .await;

        let response = service.analyze(request()).await;

        assert!(response.error().is_none());
        assert_eq!(store.read_attempts(), 2);
    }

    #[tokio::test]
    async fn storage_and_format_failures_are_classified() {
        let (service, _) = service_with(b"<html>not a pdf</html>".to_vec()).await;
        let response = service.analyze(request()).await;
        let body = serde_json::to_value(&response).expect("json");
        assert_eq!(body["documentId"], "doc-1");
        assert_eq!(body["requiresChunking"], false);
        assert_eq!(body["error"]["kind"], "InvalidFormat");
        assert_eq!(body["error"]["details"]["detectedType"], "HTML");

        let missing = service
            .analyze(AnalysisRequest::new(
                "doc-2",
                BlobLocation::new("input", "docs/missing.pdf"),
            ))
            .await;
        let error = missing.error().expect("error");
        assert_eq!(error.kind, ErrorKind::StorageNotFound);
        assert!(!error.recoverable);
    }

    #[tokio::test]
    async fn encrypted_documents_fail_without_writing_chunks() {
        let (service, store) = service_with(encrypted_pdf()).await;

        let response = service
            .analyze(request().with_config(fixed_pages_config()))
            .await;

        let body = serde_json::to_value(&response).expect("json");
        assert_eq!(body["documentId"], "doc-1");
        assert_eq!(body["requiresChunking"], false);
        assert_eq!(body["error"]["kind"], "EncryptedFormat");
        assert_eq!(body["error"]["recoverable"], false);
        assert_eq!(store.locations().await.len(), 1);
        assert_eq!(service.metrics_snapshot().analysis_failures, 1);
    }

    #[tokio::test]
    async fn aggregate_requires_document_id_and_counts_results() {
        let (service, _) = service_with(numbered_pdf(1)).await;

        let err = service
            .aggregate(AggregationRequest::default())
            .expect_err("missing id");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let result = service
            .aggregate(AggregationRequest {
                document_id: Some("doc-1".into()),
                chunk_results: vec![
                    ChunkResult {
                        chunk_index: 0,
                        classification: Some("INVOICE".into()),
                        ..Default::default()
                    },
                    ChunkResult {
                        chunk_index: 1,
                        error: Some("boom".into()),
                        ..Default::default()
                    },
                ],
                aggregation_strategy: Some("majority_vote".into()),
            })
            .expect("aggregate");
        assert_eq!(result.classification.as_deref(), Some("INVOICE"));
        assert!(!result.partial_result);
        let metrics = service.metrics_snapshot();
        assert_eq!(metrics.aggregations, 1);
        assert_eq!(metrics.failed_chunk_results, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_written_chunks() {
        let (service, store) = service_with(numbered_pdf(6)).await;
        let response = service
            .analyze(request().with_config(fixed_pages_config()))
            .await;
        let chunks = response
            .chunks()
            .iter()
            .map(|chunk| ChunkReference {
                bucket: Some(chunk.location.bucket.clone()),
                key: Some(chunk.location.key.clone()),
                chunk_id: Some(chunk.chunk_id.clone()),
            })
            .collect();

        let cleanup = service
            .cleanup(CleanupRequest {
                document_id: Some("doc-1".into()),
                chunks,
            })
            .await;

        assert_eq!(cleanup.deleted_chunks, 3);
        assert!(cleanup.errors.is_empty());
        assert_eq!(
            store.locations().await,
            vec![BlobLocation::new("input", "docs/report.pdf")]
        );
    }

    #[test]
    fn timeout_response_is_fatal() {
        let response =
            ChunkingService::timeout_response(Some("doc".into()), Duration::from_secs(900));
        let error = response.error().expect("error");
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert!(!error.recoverable);
        assert_eq!(error.details["timeoutSeconds"], 900);
    }
}
