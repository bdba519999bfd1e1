//! Threshold checks deciding whether a document must be chunked.

use super::settings::{ChunkingConfig, ChunkingStrategy};
use serde::Serialize;

/// Outcome of the threshold check for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySelection {
    /// Whether the document must be split.
    pub requires_chunking: bool,
    /// Strategy whose thresholds were evaluated.
    pub strategy: ChunkingStrategy,
    /// Human readable explanation naming the exceeded threshold(s).
    pub reason: String,
    /// `total_pages > page_threshold` (never evaluated for token-based).
    pub page_threshold_exceeded: bool,
    /// `total_tokens > token_threshold` (never evaluated for fixed-pages).
    pub token_threshold_exceeded: bool,
}

/// Compare document size against the thresholds of the configured strategy.
///
/// All comparisons are strict: a document exactly at a threshold is not chunked.
pub fn select_strategy(
    total_pages: usize,
    total_tokens: u64,
    config: &ChunkingConfig,
) -> StrategySelection {
    let page_limit = config.page_threshold;
    let token_limit = config.token_threshold;
    let (pages_over, tokens_over) = match config.strategy {
        ChunkingStrategy::FixedPages => (total_pages > page_limit, false),
        ChunkingStrategy::TokenBased => (false, total_tokens > token_limit),
        ChunkingStrategy::Hybrid => (total_pages > page_limit, total_tokens > token_limit),
    };

    let pages = total_pages;
    let tokens = thousands(total_tokens);
    let token_limit = thousands(token_limit);
    let reason = match config.strategy {
        ChunkingStrategy::FixedPages => format!(
            "Document has {pages} pages, {} threshold of {page_limit} pages (fixed-pages strategy)",
            if pages_over { "exceeding" } else { "below" }
        ),
        ChunkingStrategy::TokenBased => format!(
            "Document has {tokens} tokens, {} threshold of {token_limit} tokens (token-based strategy)",
            if tokens_over { "exceeding" } else { "below" }
        ),
        ChunkingStrategy::Hybrid => match (pages_over, tokens_over) {
            (true, true) => format!(
                "Document has {pages} pages (threshold: {page_limit}) and {tokens} tokens (threshold: {token_limit}), both thresholds exceeded (hybrid strategy)"
            ),
            (true, false) => format!(
                "Document has {pages} pages, exceeding threshold of {page_limit} pages; {tokens} tokens below threshold of {token_limit} (hybrid strategy)"
            ),
            (false, true) => format!(
                "Document has {tokens} tokens, exceeding threshold of {token_limit} tokens; {pages} pages below threshold of {page_limit} (hybrid strategy)"
            ),
            (false, false) => format!(
                "Document has {pages} pages and {tokens} tokens, below thresholds of {page_limit} pages and {token_limit} tokens (hybrid strategy)"
            ),
        },
    };

    let selection = StrategySelection {
        requires_chunking: pages_over || tokens_over,
        strategy: config.strategy,
        reason,
        page_threshold_exceeded: pages_over,
        token_threshold_exceeded: tokens_over,
    };
    tracing::info!(
        strategy = %selection.strategy,
        requires_chunking = selection.requires_chunking,
        total_pages,
        total_tokens,
        page_threshold = config.page_threshold,
        token_threshold = config.token_threshold,
        page_threshold_exceeded = selection.page_threshold_exceeded,
        token_threshold_exceeded = selection.token_threshold_exceeded,
        "Strategy decision"
    );
    selection
}

/// Format with comma thousands separators.
fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }
    formatted
}
