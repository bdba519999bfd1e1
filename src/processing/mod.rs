//! Document chunking pipeline: token analysis, boundary planning, splitting, and aggregation.

pub mod aggregate;
pub mod analysis;
pub mod boundaries;
pub mod cleanup;
pub mod errors;
pub mod pdf;
pub mod retry;
mod service;
pub mod settings;
pub mod splitter;
pub mod strategy;
pub mod tokens;
pub mod types;

pub use aggregate::{AggregatedResult, ChunkResult, Entity, aggregate_results};
pub use analysis::{ChunkAnalyzer, analyze_chunks, chunk_context};
pub use boundaries::{ChunkBoundary, FinalizeReason, calculate_boundaries};
pub use cleanup::{ChunkReference, CleanupRequest, CleanupResponse, cleanup_chunks};
pub use errors::{ChunkingError, ErrorKind, ErrorPayload};
pub use retry::RetryPolicy;
pub use service::{ChunkingApi, ChunkingService, DocumentPlan, plan_document};
pub use settings::{ChunkingConfig, ChunkingOverrides, ChunkingStrategy, ProcessingMode};
pub use splitter::{ChunkArtifact, DocumentSplitter, SplitReport};
pub use strategy::{StrategySelection, select_strategy};
pub use tokens::{TokenProfile, estimate_tokens};
pub use types::{AggregationRequest, AnalysisRequest, AnalysisResponse, TokenAnalysis};
