//! Request and response bodies exchanged with orchestrating workflows.

use super::aggregate::ChunkResult;
use super::errors::{ChunkingError, ErrorPayload};
use super::settings::ChunkingStrategy;
use super::splitter::ChunkArtifact;
use super::tokens::TokenProfile;
use crate::storage::BlobLocation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where the source document lives. Both fields are checked by the service, not by serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceReference {
    /// Source bucket.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Source key.
    #[serde(default)]
    pub key: Option<String>,
}

impl From<BlobLocation> for SourceReference {
    fn from(location: BlobLocation) -> Self {
        Self {
            bucket: Some(location.bucket),
            key: Some(location.key),
        }
    }
}

/// Request to analyze (and, when needed, split) one document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Identifier chosen by the caller.
    #[serde(default)]
    pub document_id: Option<String>,
    /// Location of the PDF; `content` is accepted as an alternative name.
    #[serde(default, alias = "content")]
    pub source_location: SourceReference,
    /// Must be `file` when present.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Request-level chunking overrides.
    #[serde(default)]
    pub config: Option<Value>,
    /// Free-form origin label, logged only.
    #[serde(default)]
    pub source: Option<String>,
}

impl AnalysisRequest {
    /// Request for the document at `location` with no overrides.
    pub fn new(document_id: impl Into<String>, location: BlobLocation) -> Self {
        Self {
            document_id: Some(document_id.into()),
            source_location: location.into(),
            ..Default::default()
        }
    }

    /// Attach request-level chunking overrides.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }
}

/// Token statistics echoed in every successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAnalysis {
    /// Estimated tokens in the document.
    pub total_tokens: u64,
    /// Pages in the document.
    pub total_pages: usize,
    /// Mean tokens per page.
    pub avg_tokens_per_page: f64,
    /// Per-page estimates, only reported for chunked documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_page: Option<Vec<u64>>,
}

impl TokenAnalysis {
    /// Summary without the per-page breakdown.
    pub fn summary(profile: &TokenProfile) -> Self {
        Self {
            total_tokens: profile.total_tokens,
            total_pages: profile.total_pages,
            avg_tokens_per_page: profile.avg_tokens_per_page,
            tokens_per_page: None,
        }
    }

    /// Summary including the per-page breakdown.
    pub fn detailed(profile: &TokenProfile) -> Self {
        Self {
            tokens_per_page: Some(profile.tokens_per_page.clone()),
            ..Self::summary(profile)
        }
    }
}

/// Document is small enough to be analyzed whole.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectAnalysis {
    /// Document identifier.
    pub document_id: String,
    /// Always `false`.
    pub requires_chunking: bool,
    /// Token statistics.
    pub token_analysis: TokenAnalysis,
    /// Why no chunking is needed.
    pub reason: String,
}

/// Document was split into persisted chunks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedAnalysis {
    /// Document identifier.
    pub document_id: String,
    /// Always `true`.
    pub requires_chunking: bool,
    /// Token statistics with the per-page breakdown.
    pub token_analysis: TokenAnalysis,
    /// Strategy used to place the boundaries.
    pub strategy: ChunkingStrategy,
    /// Persisted chunks in chunk order.
    pub chunks: Vec<ChunkArtifact>,
    /// Effective strategy parameters.
    pub config: Map<String, Value>,
    /// Pages left out of every chunk because they could not be copied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_pages: Vec<usize>,
}

/// Analysis failed with a classified error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAnalysis {
    /// Document identifier, when the request carried one.
    pub document_id: Option<String>,
    /// Always `false`.
    pub requires_chunking: bool,
    /// Structured error for workflow branching.
    pub error: ErrorPayload,
}

/// Outcome of [`AnalysisRequest`] processing, always rendered as a 200 body.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisResponse {
    /// No chunking required.
    Direct(DirectAnalysis),
    /// Chunks were written.
    Chunked(ChunkedAnalysis),
    /// Fatal error.
    Failed(FailedAnalysis),
}

impl AnalysisResponse {
    /// Response for a document below every threshold.
    pub fn direct(document_id: &str, profile: &TokenProfile, reason: String) -> Self {
        Self::Direct(DirectAnalysis {
            document_id: document_id.to_string(),
            requires_chunking: false,
            token_analysis: TokenAnalysis::summary(profile),
            reason,
        })
    }

    /// Response describing a failure.
    pub fn failed(document_id: Option<String>, error: &ChunkingError) -> Self {
        Self::Failed(FailedAnalysis {
            document_id: document_id.or_else(|| error.document_id.clone()),
            requires_chunking: false,
            error: error.to_payload(),
        })
    }

    /// Whether chunks were produced.
    pub fn requires_chunking(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }

    /// Chunks written for the document, empty unless chunked.
    pub fn chunks(&self) -> &[ChunkArtifact] {
        match self {
            Self::Chunked(chunked) => &chunked.chunks,
            _ => &[],
        }
    }

    /// Error payload, when the analysis failed.
    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Failed(failed) => Some(&failed.error),
            _ => None,
        }
    }
}

/// Request to fold per-chunk results into one verdict.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Owning document.
    #[serde(default)]
    pub document_id: Option<String>,
    /// One result per chunk, in any order.
    #[serde(default)]
    pub chunk_results: Vec<ChunkResult>,
    /// Only `majority_vote` is understood; anything else is logged and ignored.
    #[serde(default)]
    pub aggregation_strategy: Option<String>,
}
