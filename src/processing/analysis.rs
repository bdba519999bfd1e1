//! Driving a per-chunk analysis collaborator over persisted chunks.

use super::aggregate::ChunkResult;
use super::errors::ChunkingError;
use super::settings::ProcessingMode;
use super::splitter::ChunkArtifact;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};

/// Collaborator that classifies one chunk and extracts its entities.
#[async_trait]
pub trait ChunkAnalyzer: Send + Sync {
    /// Analyze `artifact`; `context` describes where the chunk sits in the document.
    async fn analyze(
        &self,
        artifact: &ChunkArtifact,
        context: &str,
    ) -> Result<ChunkResult, ChunkingError>;
}

/// Describe the position of `artifact`, e.g. `chunk 2 of 3, pages 46-95, 5 overlapping pages
/// from previous chunk`. Page numbers are 1-based.
pub fn chunk_context(artifact: &ChunkArtifact, previous: Option<&ChunkArtifact>) -> String {
    let mut context = format!(
        "chunk {} of {}, pages {}-{}",
        artifact.chunk_index + 1,
        artifact.total_chunks,
        artifact.start_page + 1,
        artifact.end_page + 1
    );
    let overlap = previous
        .filter(|prev| prev.end_page >= artifact.start_page)
        .map(|prev| prev.end_page.min(artifact.end_page) - artifact.start_page + 1)
        .unwrap_or(0);
    if overlap > 0 {
        context.push_str(&format!(", {overlap} overlapping pages from previous chunk"));
    }
    context
}

/// Run `analyzer` over every artifact and return one result per artifact, ordered by chunk index.
///
/// Analyzer failures become failed results rather than aborting the run, so aggregation can
/// still report a partial verdict.
pub async fn analyze_chunks(
    analyzer: &dyn ChunkAnalyzer,
    artifacts: &[ChunkArtifact],
    mode: ProcessingMode,
    max_concurrency: usize,
) -> Vec<ChunkResult> {
    let mut ordered: Vec<&ChunkArtifact> = artifacts.iter().collect();
    ordered.sort_by_key(|artifact| artifact.chunk_index);
    let jobs: Vec<(&ChunkArtifact, String)> = ordered
        .iter()
        .enumerate()
        .map(|(position, artifact)| {
            let previous = position.checked_sub(1).map(|prev| ordered[prev]);
            (*artifact, chunk_context(artifact, previous))
        })
        .collect();

    let limit = match mode {
        ProcessingMode::Sequential => 1,
        ProcessingMode::Parallel => max_concurrency.max(1),
    };
    tracing::info!(chunks = jobs.len(), concurrency = limit, "Analyzing chunks");

    stream::iter(jobs)
        .map(|(artifact, context)| async move {
            let outcome = analyzer.analyze(artifact, &context).await;
            settle(artifact, outcome)
        })
        .buffered(limit)
        .collect()
        .await
}

fn settle(artifact: &ChunkArtifact, outcome: Result<ChunkResult, ChunkingError>) -> ChunkResult {
    match outcome {
        Ok(mut result) => {
            result.chunk_index = artifact.chunk_index;
            result
        }
        Err(error) => {
            tracing::warn!(
                chunk_index = artifact.chunk_index,
                kind = %error.kind,
                error = %error.message,
                "Chunk analysis failed"
            );
            ChunkResult {
                chunk_index: artifact.chunk_index,
                error: Some(error.to_string()),
                ..Default::default()
            }
        }
    }
}
