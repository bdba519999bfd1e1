//! Chunk boundary calculation.
//!
//! Three interchangeable algorithms turn a page count or per-page token counts into an ordered
//! list of [`ChunkBoundary`] values. Every algorithm covers each page at least once, starts the
//! first chunk at page 0, and numbers chunks contiguously from 0. Pages are atomic: a page whose
//! own token count exceeds the budget is emitted as a chunk on its own.

use super::errors::ChunkingError;
use super::settings::{ChunkingConfig, ChunkingStrategy};
use super::tokens::TokenProfile;
use serde::Serialize;

/// Hybrid overlap never carries more than this many pages into the next chunk.
pub const MAX_HYBRID_OVERLAP_PAGES: usize = 10;

/// Why a hybrid chunk was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    /// Adding the next page would exceed the token target.
    TokenLimit,
    /// The chunk reached the page ceiling.
    PageLimit,
    /// Last chunk of the document.
    FinalChunk,
}

/// Inclusive page range of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkBoundary {
    /// 0-based position of the chunk.
    pub chunk_index: usize,
    /// First page (0-based).
    pub start_page: usize,
    /// Last page (0-based, inclusive).
    pub end_page: usize,
    /// `end_page - start_page + 1`.
    pub page_count: usize,
    /// Estimated tokens over the range.
    pub token_count: u64,
    /// Only set by the hybrid algorithm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_reason: Option<FinalizeReason>,
}

/// Fixed windows of `chunk_size` pages, each after the first reaching back `overlap` pages.
///
/// Token counts are left at zero; [`calculate_boundaries`] fills them from the profile.
pub fn fixed_pages(
    total_pages: usize,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkBoundary>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::configuration(
            "chunkSizePages must be positive, got 0",
        ));
    }
    if overlap >= chunk_size {
        return Err(ChunkingError::configuration(format!(
            "overlapPages ({overlap}) must be less than chunkSizePages ({chunk_size})"
        )));
    }

    let mut boundaries = Vec::with_capacity(total_pages.div_ceil(chunk_size));
    let mut current = 0;
    while current < total_pages {
        let start_page = if boundaries.is_empty() {
            0
        } else {
            current.saturating_sub(overlap)
        };
        let end_page = (current + chunk_size).min(total_pages) - 1;
        boundaries.push(ChunkBoundary {
            chunk_index: boundaries.len(),
            start_page,
            end_page,
            page_count: end_page - start_page + 1,
            token_count: 0,
            finalize_reason: None,
        });
        current = end_page + 1;
    }
    Ok(boundaries)
}

/// Accumulate pages until the next one would push the chunk past `max_tokens`, then carry
/// roughly `overlap_tokens` worth of trailing pages into the following chunk.
pub fn token_based(
    tokens_per_page: &[u64],
    max_tokens: u64,
    overlap_tokens: u64,
) -> Result<Vec<ChunkBoundary>, ChunkingError> {
    if max_tokens == 0 {
        return Err(ChunkingError::configuration(
            "maxTokensPerChunk must be positive, got 0",
        ));
    }

    let mut window = Window::new(tokens_per_page);
    for &page_tokens in tokens_per_page {
        if window.pages > 0 && window.tokens + page_tokens > max_tokens {
            window.roll_over(None, overlap_tokens, max_tokens, page_tokens, usize::MAX);
        }
        window.push_page(page_tokens);
    }
    window.close(None);
    Ok(window.boundaries)
}

/// Token target with a hard page ceiling.
///
/// A chunk closes when the next page would exceed `target_tokens` or when it already holds
/// `max_pages` pages. Overlap follows the token-based walk-back but is capped at
/// [`MAX_HYBRID_OVERLAP_PAGES`] and always leaves room for at least one new page.
pub fn hybrid(
    tokens_per_page: &[u64],
    target_tokens: u64,
    max_pages: usize,
    overlap_tokens: u64,
) -> Result<Vec<ChunkBoundary>, ChunkingError> {
    if target_tokens == 0 {
        return Err(ChunkingError::configuration(
            "targetTokensPerChunk must be positive, got 0",
        ));
    }
    if max_pages == 0 {
        return Err(ChunkingError::configuration(
            "maxPagesPerChunk must be positive, got 0",
        ));
    }

    let max_overlap_pages = MAX_HYBRID_OVERLAP_PAGES.min(max_pages - 1);
    let mut window = Window::new(tokens_per_page);
    for &page_tokens in tokens_per_page {
        let at_page_cap = window.pages >= max_pages;
        if window.pages > 0 && (at_page_cap || window.tokens + page_tokens > target_tokens) {
            let reason = if at_page_cap {
                FinalizeReason::PageLimit
            } else {
                FinalizeReason::TokenLimit
            };
            window.roll_over(
                Some(reason),
                overlap_tokens,
                target_tokens,
                page_tokens,
                max_overlap_pages,
            );
        }
        window.push_page(page_tokens);
    }

    // The main pass keeps every chunk within the cap; this only guards the trailing window.
    while window.pages > max_pages {
        window.split_off(max_pages, FinalizeReason::PageLimit);
    }
    window.close(Some(FinalizeReason::FinalChunk));
    Ok(window.boundaries)
}

/// Run the configured algorithm over `profile`.
pub fn calculate_boundaries(
    config: &ChunkingConfig,
    profile: &TokenProfile,
) -> Result<Vec<ChunkBoundary>, ChunkingError> {
    let boundaries = match config.strategy {
        ChunkingStrategy::FixedPages => {
            let mut boundaries = fixed_pages(
                profile.total_pages,
                config.chunk_size_pages,
                config.overlap_pages,
            )?;
            for boundary in &mut boundaries {
                boundary.token_count =
                    profile.tokens_in_range(boundary.start_page, boundary.end_page);
            }
            boundaries
        }
        ChunkingStrategy::TokenBased => token_based(
            &profile.tokens_per_page,
            config.max_tokens_per_chunk,
            config.overlap_tokens,
        )?,
        ChunkingStrategy::Hybrid => hybrid(
            &profile.tokens_per_page,
            config.target_tokens_per_chunk,
            config.max_pages_per_chunk,
            config.overlap_tokens,
        )?,
    };
    tracing::debug!(
        strategy = %config.strategy,
        chunks = boundaries.len(),
        total_pages = profile.total_pages,
        "Calculated chunk boundaries"
    );
    Ok(boundaries)
}

/// Open chunk being accumulated over a contiguous page range.
struct Window<'a> {
    tokens_per_page: &'a [u64],
    boundaries: Vec<ChunkBoundary>,
    start: usize,
    pages: usize,
    tokens: u64,
}

impl<'a> Window<'a> {
    fn new(tokens_per_page: &'a [u64]) -> Self {
        Self {
            tokens_per_page,
            boundaries: Vec::new(),
            start: 0,
            pages: 0,
            tokens: 0,
        }
    }

    fn push_page(&mut self, page_tokens: u64) {
        self.pages += 1;
        self.tokens += page_tokens;
    }

    fn emit(&mut self, pages: usize, tokens: u64, reason: Option<FinalizeReason>) {
        self.boundaries.push(ChunkBoundary {
            chunk_index: self.boundaries.len(),
            start_page: self.start,
            end_page: self.start + pages - 1,
            page_count: pages,
            token_count: tokens,
            finalize_reason: reason,
        });
    }

    /// Emit the open chunk (if any).
    fn close(&mut self, reason: Option<FinalizeReason>) {
        if self.pages > 0 {
            self.emit(self.pages, self.tokens, reason);
        }
    }

    /// Emit the first `pages` pages of the window as their own chunk, without overlap.
    fn split_off(&mut self, pages: usize, reason: FinalizeReason) {
        let tokens = self.tokens_per_page[self.start..self.start + pages]
            .iter()
            .sum();
        self.emit(pages, tokens, Some(reason));
        self.start += pages;
        self.pages -= pages;
        self.tokens -= tokens;
    }

    /// Close the open chunk and reopen with trailing pages carried over as overlap.
    ///
    /// Walks back from the last page while the carried tokens are below `overlap_tokens`. A
    /// page is only carried if the carried tokens plus `next_page_tokens` stay within `limit`,
    /// and the chunk's own first page is never carried so chunk starts strictly increase.
    fn roll_over(
        &mut self,
        reason: Option<FinalizeReason>,
        overlap_tokens: u64,
        limit: u64,
        next_page_tokens: u64,
        max_overlap_pages: usize,
    ) {
        self.close(reason);
        let last = self.start + self.pages - 1;

        let mut carried_pages = 0;
        let mut carried_tokens = 0;
        while carried_pages < max_overlap_pages && carried_tokens < overlap_tokens {
            let candidate = last - carried_pages;
            if candidate <= self.start {
                break;
            }
            let candidate_tokens = self.tokens_per_page[candidate];
            if carried_tokens + candidate_tokens + next_page_tokens > limit {
                break;
            }
            carried_tokens += candidate_tokens;
            carried_pages += 1;
        }

        self.start = last + 1 - carried_pages;
        self.pages = carried_pages;
        self.tokens = carried_tokens;
    }
}
