//! Chunking parameters: canonical typed config, partial overrides, and the ordered merge.

use super::errors::ChunkingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Boundary algorithm used when a document needs chunking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingStrategy {
    /// Fixed-size page windows.
    #[serde(alias = "fixed_pages")]
    FixedPages,
    /// Token-budgeted windows.
    #[serde(alias = "token_based")]
    TokenBased,
    /// Token target with a hard page ceiling.
    #[default]
    Hybrid,
}

impl ChunkingStrategy {
    /// Wire name of the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixedPages => "fixed-pages",
            Self::TokenBased => "token-based",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "fixed-pages" => Ok(Self::FixedPages),
            "token-based" => Ok(Self::TokenBased),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(()),
        }
    }
}

/// Advisory hint for the orchestrator that runs per-chunk analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// One chunk at a time.
    Sequential,
    /// Up to `maxConcurrency` chunks at once.
    #[default]
    Parallel,
}

impl std::str::FromStr for ProcessingMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            _ => Err(()),
        }
    }
}

/// Fully resolved chunking configuration for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingConfig {
    /// Boundary algorithm.
    pub strategy: ChunkingStrategy,
    /// Page count above which a document is chunked.
    pub page_threshold: usize,
    /// Token count above which a document is chunked.
    pub token_threshold: u64,
    /// Window size for fixed-page chunking.
    pub chunk_size_pages: usize,
    /// Pages repeated at the start of each fixed-page window.
    pub overlap_pages: usize,
    /// Token ceiling for token-based chunking.
    pub max_tokens_per_chunk: u64,
    /// Token budget of the overlap carried into the next chunk.
    pub overlap_tokens: u64,
    /// Soft token target for hybrid chunking.
    pub target_tokens_per_chunk: u64,
    /// Hard page ceiling for hybrid chunking.
    pub max_pages_per_chunk: usize,
    /// Advisory scheduling hint.
    pub processing_mode: ProcessingMode,
    /// Concurrency bound for chunk writes and parallel analysis.
    pub max_concurrency: usize,
    /// Collect every validation violation instead of stopping at the first.
    pub strict: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Hybrid,
            page_threshold: 100,
            token_threshold: 150_000,
            chunk_size_pages: 50,
            overlap_pages: 5,
            max_tokens_per_chunk: 100_000,
            overlap_tokens: 5_000,
            target_tokens_per_chunk: 80_000,
            // One below the downstream hard limit of 100 pages.
            max_pages_per_chunk: 99,
            processing_mode: ProcessingMode::Parallel,
            max_concurrency: 10,
            strict: false,
        }
    }
}

/// Partial configuration from one source (environment or request).
///
/// Canonical keys are camelCase; snake_case spellings and the legacy `chunkingStrategy` and
/// `chunkSize` names are accepted as declared aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingOverrides {
    /// Boundary algorithm.
    #[serde(default, alias = "chunkingStrategy", alias = "chunking_strategy")]
    pub strategy: Option<ChunkingStrategy>,
    /// Page threshold.
    #[serde(default, alias = "page_threshold")]
    pub page_threshold: Option<usize>,
    /// Token threshold.
    #[serde(default, alias = "token_threshold")]
    pub token_threshold: Option<u64>,
    /// Fixed-page window size.
    #[serde(default, alias = "chunkSize", alias = "chunk_size", alias = "chunk_size_pages")]
    pub chunk_size_pages: Option<usize>,
    /// Fixed-page overlap.
    #[serde(default, alias = "overlap_pages")]
    pub overlap_pages: Option<usize>,
    /// Token-based ceiling.
    #[serde(default, alias = "max_tokens_per_chunk")]
    pub max_tokens_per_chunk: Option<u64>,
    /// Overlap token budget.
    #[serde(default, alias = "overlap_tokens")]
    pub overlap_tokens: Option<u64>,
    /// Hybrid token target.
    #[serde(default, alias = "target_tokens_per_chunk")]
    pub target_tokens_per_chunk: Option<u64>,
    /// Hybrid page ceiling.
    #[serde(default, alias = "max_pages_per_chunk")]
    pub max_pages_per_chunk: Option<usize>,
    /// Scheduling hint.
    #[serde(default, alias = "processing_mode")]
    pub processing_mode: Option<ProcessingMode>,
    /// Concurrency bound.
    #[serde(default, alias = "max_concurrency")]
    pub max_concurrency: Option<usize>,
    /// Strict validation flag.
    #[serde(default)]
    pub strict: Option<bool>,
}

impl ChunkingOverrides {
    /// Parse request-level overrides from an arbitrary JSON value.
    pub fn from_json(value: Value) -> Result<Self, ChunkingError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|err| {
            ChunkingError::configuration(format!("Invalid chunking configuration: {err}"))
        })
    }
}

impl ChunkingConfig {
    /// Apply every field set in `overrides`, leaving the rest untouched.
    pub fn apply(mut self, overrides: &ChunkingOverrides) -> Self {
        let o = overrides;
        if let Some(value) = o.strategy {
            self.strategy = value;
        }
        if let Some(value) = o.page_threshold {
            self.page_threshold = value;
        }
        if let Some(value) = o.token_threshold {
            self.token_threshold = value;
        }
        if let Some(value) = o.chunk_size_pages {
            self.chunk_size_pages = value;
        }
        if let Some(value) = o.overlap_pages {
            self.overlap_pages = value;
        }
        if let Some(value) = o.max_tokens_per_chunk {
            self.max_tokens_per_chunk = value;
        }
        if let Some(value) = o.overlap_tokens {
            self.overlap_tokens = value;
        }
        if let Some(value) = o.target_tokens_per_chunk {
            self.target_tokens_per_chunk = value;
        }
        if let Some(value) = o.max_pages_per_chunk {
            self.max_pages_per_chunk = value;
        }
        if let Some(value) = o.processing_mode {
            self.processing_mode = value;
        }
        if let Some(value) = o.max_concurrency {
            self.max_concurrency = value;
        }
        if let Some(value) = o.strict {
            self.strict = value;
        }
        self
    }

    /// Resolve the effective config: defaults, then environment, then request.
    pub fn merge(
        defaults: &ChunkingConfig,
        env: &ChunkingOverrides,
        request: &ChunkingOverrides,
    ) -> ChunkingConfig {
        defaults.clone().apply(env).apply(request)
    }

    /// Check the shared invariants.
    ///
    /// Fails on the first violation, or on all of them joined with `"; "` when `strict` is set.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        let violations = self.violations();
        if violations.is_empty() {
            return Ok(());
        }
        let message = if self.strict {
            violations.join("; ")
        } else {
            violations[0].clone()
        };
        Err(ChunkingError::configuration(message).with_detail(
            "violations",
            violations.into_iter().map(Value::String).collect::<Vec<_>>(),
        ))
    }

    fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.chunk_size_pages == 0 {
            violations.push("chunkSizePages must be positive, got 0".to_string());
        } else if self.overlap_pages >= self.chunk_size_pages {
            violations.push(format!(
                "overlapPages ({}) must be less than chunkSizePages ({})",
                self.overlap_pages, self.chunk_size_pages
            ));
        }
        let positives: [(&str, u64); 6] = [
            ("pageThreshold", self.page_threshold as u64),
            ("tokenThreshold", self.token_threshold),
            ("maxTokensPerChunk", self.max_tokens_per_chunk),
            ("targetTokensPerChunk", self.target_tokens_per_chunk),
            ("maxPagesPerChunk", self.max_pages_per_chunk as u64),
            ("maxConcurrency", self.max_concurrency as u64),
        ];
        for (name, value) in positives {
            if value == 0 {
                violations.push(format!("{name} must be positive, got 0"));
            }
        }
        violations
    }

    /// Parameters relevant to the selected strategy, echoed back in chunked responses.
    pub fn describe(&self, total_pages: usize, total_tokens: u64) -> Map<String, Value> {
        let mut params = match self.strategy {
            ChunkingStrategy::FixedPages => json!({
                "strategy": self.strategy,
                "chunkSize": self.chunk_size_pages,
                "overlapPages": self.overlap_pages,
                "pageThreshold": self.page_threshold,
            }),
            ChunkingStrategy::TokenBased => json!({
                "strategy": self.strategy,
                "maxTokensPerChunk": self.max_tokens_per_chunk,
                "overlapTokens": self.overlap_tokens,
                "tokenThreshold": self.token_threshold,
            }),
            ChunkingStrategy::Hybrid => json!({
                "strategy": self.strategy,
                "targetTokensPerChunk": self.target_tokens_per_chunk,
                "maxPagesPerChunk": self.max_pages_per_chunk,
                "overlapTokens": self.overlap_tokens,
                "pageThreshold": self.page_threshold,
                "tokenThreshold": self.token_threshold,
            }),
        };
        if let Some(map) = params.as_object_mut() {
            map.insert("processingMode".into(), json!(self.processing_mode));
            map.insert("maxConcurrency".into(), json!(self.max_concurrency));
            map.insert("totalPages".into(), json!(total_pages));
            map.insert("totalTokens".into(), json!(total_tokens));
        }
        match params {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::errors::ErrorKind;

    #[test]
    fn defaults_match_documented_values() {
        let config = ChunkingConfig::default();
        assert_eq!(config.strategy, ChunkingStrategy::Hybrid);
        assert_eq!(config.page_threshold, 100);
        assert_eq!(config.token_threshold, 150_000);
        assert_eq!(config.max_pages_per_chunk, 99);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn request_overrides_beat_environment_overrides() {
        let env = ChunkingOverrides {
            strategy: Some(ChunkingStrategy::FixedPages),
            chunk_size_pages: Some(20),
            page_threshold: Some(40),
            ..Default::default()
        };
        let request = ChunkingOverrides::from_json(json!({
            "chunk_size": 30,
            "overlapPages": 2
        }))
        .expect("overrides");

        let merged = ChunkingConfig::merge(&ChunkingConfig::default(), &env, &request);
        assert_eq!(merged.strategy, ChunkingStrategy::FixedPages);
        assert_eq!(merged.chunk_size_pages, 30);
        assert_eq!(merged.overlap_pages, 2);
        assert_eq!(merged.page_threshold, 40);
        assert_eq!(merged.token_threshold, 150_000);
    }

    #[test]
    fn accepts_both_casing_conventions_and_legacy_names() {
        let snake = ChunkingOverrides::from_json(json!({
            "chunking_strategy": "token_based",
            "max_tokens_per_chunk": 1000,
            "overlap_tokens": 100,
            "processing_mode": "sequential"
        }))
        .expect("snake");
        let camel = ChunkingOverrides::from_json(json!({
            "chunkingStrategy": "token-based",
            "maxTokensPerChunk": 1000,
            "overlapTokens": 100,
            "processingMode": "sequential"
        }))
        .expect("camel");
        assert_eq!(snake, camel);
        assert_eq!(snake.strategy, Some(ChunkingStrategy::TokenBased));
    }

    #[test]
    fn malformed_overrides_are_configuration_errors() {
        let err = ChunkingOverrides::from_json(json!({ "pageThreshold": -5 }))
            .expect_err("negative threshold");
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        let err = ChunkingOverrides::from_json(json!({ "strategy": "random" }))
            .expect_err("unknown strategy");
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
    }

    #[test]
    fn non_strict_validation_reports_first_violation() {
        let config = ChunkingConfig {
            chunk_size_pages: 10,
            overlap_pages: 10,
            page_threshold: 0,
            ..Default::default()
        };
        let err = config.validate().expect_err("invalid");
        assert_eq!(
            err.message,
            "overlapPages (10) must be less than chunkSizePages (10)"
        );
    }

    #[test]
    fn strict_validation_collects_every_violation() {
        let config = ChunkingConfig {
            chunk_size_pages: 0,
            page_threshold: 0,
            max_pages_per_chunk: 0,
            strict: true,
            ..Default::default()
        };
        let err = config.validate().expect_err("invalid");
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        assert_eq!(
            err.message,
            "chunkSizePages must be positive, got 0; pageThreshold must be positive, got 0; maxPagesPerChunk must be positive, got 0"
        );
        assert_eq!(err.details["violations"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn describe_echoes_strategy_specific_parameters() {
        let config = ChunkingConfig {
            strategy: ChunkingStrategy::FixedPages,
            ..Default::default()
        };
        let params = config.describe(150, 9000);
        assert_eq!(params["strategy"], "fixed-pages");
        assert_eq!(params["chunkSize"], 50);
        assert_eq!(params["totalPages"], 150);
        assert!(!params.contains_key("targetTokensPerChunk"));
    }

    #[test]
    fn strategy_parses_loosely() {
        assert_eq!(
            "FIXED_PAGES".parse::<ChunkingStrategy>(),
            Ok(ChunkingStrategy::FixedPages)
        );
        assert_eq!(
            "token-based".parse::<ChunkingStrategy>(),
            Ok(ChunkingStrategy::TokenBased)
        );
        assert!("pages".parse::<ChunkingStrategy>().is_err());
    }
}
