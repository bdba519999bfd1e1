//! Token density estimation from extracted page text.

use super::errors::ChunkingError;
use super::pdf::PdfDocument;
use serde::Serialize;

/// Multiplier applied to the word count.
const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate the token count of `text`: alphanumeric runs times 1.3, truncated.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut words = 0u64;
    let mut in_word = false;
    for ch in text.chars() {
        let word_char = ch.is_alphanumeric() || ch == '_';
        if word_char && !in_word {
            words += 1;
        }
        in_word = word_char;
    }
    (words as f64 * TOKENS_PER_WORD) as u64
}

/// Per-page token counts for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenProfile {
    /// Number of pages in the document.
    pub total_pages: usize,
    /// Estimated tokens per page, indexed by 0-based page number.
    pub tokens_per_page: Vec<u64>,
    /// Sum of `tokens_per_page`.
    pub total_tokens: u64,
    /// Mean tokens per page (0 for an empty document).
    pub avg_tokens_per_page: f64,
}

impl TokenProfile {
    /// Build a profile from per-page counts.
    pub fn from_page_tokens(tokens_per_page: Vec<u64>) -> Self {
        let total_pages = tokens_per_page.len();
        let total_tokens = tokens_per_page.iter().sum();
        let avg_tokens_per_page = if total_pages == 0 {
            0.0
        } else {
            total_tokens as f64 / total_pages as f64
        };
        Self {
            total_pages,
            tokens_per_page,
            total_tokens,
            avg_tokens_per_page,
        }
    }

    /// Sum of tokens over `start..=end`, clamped to the pages the profile knows about.
    pub fn tokens_in_range(&self, start: usize, end: usize) -> u64 {
        if start >= self.tokens_per_page.len() || end < start {
            return 0;
        }
        let end = end.min(self.tokens_per_page.len() - 1);
        self.tokens_per_page[start..=end].iter().sum()
    }
}

/// Anything that can hand out the text of its pages.
pub trait PageTextSource {
    /// Number of pages.
    fn page_count(&self) -> usize;

    /// Text of page `index` (0-based).
    fn page_text(&self, index: usize) -> Result<String, ChunkingError>;
}

/// Estimate tokens for every page of `source`.
///
/// A page whose text cannot be extracted counts as zero tokens; structural failures of the
/// document itself surface earlier, when the source is opened.
pub fn analyze_pages(source: &impl PageTextSource) -> TokenProfile {
    let tokens = (0..source.page_count())
        .map(|index| match source.page_text(index) {
            Ok(text) => estimate_tokens(&text),
            Err(error) => {
                tracing::warn!(
                    page = index,
                    error = %error,
                    "Text extraction failed; counting page as empty"
                );
                0
            }
        })
        .collect();
    let profile = TokenProfile::from_page_tokens(tokens);
    tracing::debug!(
        total_pages = profile.total_pages,
        total_tokens = profile.total_tokens,
        avg_tokens_per_page = profile.avg_tokens_per_page,
        "Estimated document tokens"
    );
    profile
}

/// Parse `bytes` as a PDF and estimate its token profile.
pub fn analyze_document(bytes: &[u8]) -> Result<TokenProfile, ChunkingError> {
    let document = PdfDocument::parse(bytes)?;
    Ok(analyze_pages(&document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pdf::fixtures::pdf_with_pages;

    struct Pages(Vec<Result<&'static str, &'static str>>);

    impl PageTextSource for Pages {
        fn page_count(&self) -> usize {
            self.0.len()
        }

        fn page_text(&self, index: usize) -> Result<String, ChunkingError> {
            self.0[index]
                .map(str::to_string)
                .map_err(ChunkingError::corrupted)
        }
    }

    #[test]
    fn estimate_counts_words_times_factor() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n\t"), 0);
        assert_eq!(estimate_tokens("hello"), 1);
        assert_eq!(estimate_tokens("Hello, world!"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(estimate_tokens("snake_case stays-split 2024-01-01"), 7);
    }

    #[test]
    fn profile_tracks_totals_and_average() {
        let profile = TokenProfile::from_page_tokens(vec![100, 200, 300]);
        assert_eq!(profile.total_pages, 3);
        assert_eq!(profile.total_tokens, 600);
        assert!((profile.avg_tokens_per_page - 200.0).abs() < f64::EPSILON);
        assert_eq!(profile.tokens_in_range(1, 10), 500);
        assert_eq!(profile.tokens_in_range(5, 6), 0);
    }

    #[test]
    fn empty_profile_has_zero_average() {
        let profile = TokenProfile::from_page_tokens(Vec::new());
        assert_eq!(profile.avg_tokens_per_page, 0.0);
    }

    #[test]
    fn unreadable_pages_count_as_empty() {
        let source = Pages(vec![Ok("alpha beta"), Err("bad stream"), Ok("gamma")]);
        let profile = analyze_pages(&source);
        assert_eq!(profile.tokens_per_page, vec![2, 0, 1]);
    }

    #[test]
    fn analyze_document_profiles_real_pdf_pages() {
        let bytes = pdf_with_pages(
            &["one two three four five six seven eight nine ten", "", "alpha"],
            &[],
        );
        let profile = analyze_document(&bytes).expect("profile");
        assert_eq!(profile.total_pages, 3);
        assert_eq!(profile.tokens_per_page, vec![13, 0, 1]);
        assert_eq!(profile.total_tokens, 14);
    }

    #[test]
    fn analyze_document_rejects_non_pdf_bytes() {
        let err = analyze_document(b"PK\x03\x04 not a pdf").expect_err("zip bytes");
        assert_eq!(err.kind, crate::processing::errors::ErrorKind::InvalidFormat);
    }
}
