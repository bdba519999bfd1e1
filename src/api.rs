//! HTTP surface for docsplit.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /analyze` – Estimate tokens for a stored PDF, decide whether it needs chunking and,
//!   if so, split it and persist the chunks. Always answers 200; fatal errors are returned as
//!   `{documentId, requiresChunking: false, error}` so workflows can branch on `error.kind`.
//! - `POST /aggregate` – Fold per-chunk analysis results into one document-level verdict.
//! - `POST /cleanup` – Best-effort removal of chunk artifacts.
//! - `GET /metrics` – Observe chunking counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    AggregatedResult, AggregationRequest, AnalysisRequest, AnalysisResponse, ChunkingApi,
    ChunkingError, ChunkingService, CleanupRequest, CleanupResponse, ErrorKind,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Shared handler state: the pipeline plus the deadline enforced around `/analyze`.
struct AppState<S> {
    service: Arc<S>,
    request_timeout: Duration,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            request_timeout: self.request_timeout,
        }
    }
}

/// Build the HTTP router exposing the chunking API surface.
pub fn create_router<S>(service: Arc<S>, request_timeout: Duration) -> Router
where
    S: ChunkingApi + 'static,
{
    Router::new()
        .route("/analyze", post(analyze_document::<S>))
        .route("/aggregate", post(aggregate_results::<S>))
        .route("/cleanup", post(cleanup_chunks::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(AppState {
            service,
            request_timeout,
        })
}

/// Analyze a document and split it when it exceeds the configured thresholds.
///
/// The deadline covers the whole analyze-then-split run; when it elapses the caller receives
/// a non-recoverable `Timeout` error body.
async fn analyze_document<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<AnalysisRequest>,
) -> Json<AnalysisResponse>
where
    S: ChunkingApi,
{
    let document_id = request.document_id.clone();
    match tokio::time::timeout(state.request_timeout, state.service.analyze(request)).await {
        Ok(response) => Json(response),
        Err(_) => {
            tracing::error!(
                document_id = document_id.as_deref().unwrap_or("unknown"),
                timeout_secs = state.request_timeout.as_secs(),
                "Analysis exceeded its deadline"
            );
            Json(ChunkingService::timeout_response(
                document_id,
                state.request_timeout,
            ))
        }
    }
}

/// Aggregate per-chunk analysis results.
async fn aggregate_results<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<AggregationRequest>,
) -> Result<Json<AggregatedResult>, AppError>
where
    S: ChunkingApi,
{
    let result = state.service.aggregate(request).await?;
    Ok(Json(result))
}

/// Delete chunk artifacts; never fails.
async fn cleanup_chunks<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<CleanupRequest>,
) -> Json<CleanupResponse>
where
    S: ChunkingApi,
{
    Json(state.service.cleanup(request).await)
}

/// Return the chunking counters.
async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<MetricsSnapshot>
where
    S: ChunkingApi,
{
    Json(state.service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "analyze",
                method: "POST",
                path: "/analyze",
                description: "Estimate tokens for a stored PDF and split it into chunks when it exceeds the page or token thresholds. Returns { \"requiresChunking\": bool, \"tokenAnalysis\": {...} } plus chunks or an error.",
                request_example: Some(json!({
                    "documentId": "invoice-2024-001",
                    "contentType": "file",
                    "content": { "bucket": "incoming", "key": "invoices/2024-001.pdf" },
                    "config": { "strategy": "hybrid", "targetTokensPerChunk": 80000 }
                })),
            },
            CommandDescriptor {
                name: "aggregate",
                method: "POST",
                path: "/aggregate",
                description: "Combine per-chunk classifications and entities into one document result using a majority vote.",
                request_example: Some(json!({
                    "documentId": "invoice-2024-001",
                    "chunkResults": [
                        { "chunkIndex": 0, "classification": "INVOICE", "entities": [{ "type": "AMOUNT", "value": "100.00" }] },
                        { "chunkIndex": 1, "error": "analysis failed" }
                    ]
                })),
            },
            CommandDescriptor {
                name: "cleanup",
                method: "POST",
                path: "/cleanup",
                description: "Delete chunk artifacts for a document. Failures are reported, never raised.",
                request_example: Some(json!({
                    "documentId": "invoice-2024-001",
                    "chunks": [{ "bucket": "incoming", "key": "chunks/invoice-2024-001/invoice-2024-001_chunk_0.pdf", "chunkId": "invoice-2024-001_chunk_0" }]
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return chunking counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ChunkingError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::InvalidRequest | ErrorKind::ConfigurationError => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_payload() }))).into_response()
    }
}

impl From<ChunkingError> for AppError {
    fn from(inner: ChunkingError) -> Self {
        Self(inner)
    }
}
