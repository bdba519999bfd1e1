use crate::processing::{ChunkingOverrides, ChunkingStrategy, ProcessingMode};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docsplit server and CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Blob store implementation used for sources and chunks.
    pub storage_backend: StorageBackend,
    /// Root directory of the filesystem store.
    pub storage_root: PathBuf,
    /// Base URL of the object gateway (HTTP backend only).
    pub storage_url: Option<String>,
    /// Bucket receiving chunk artifacts; the source bucket when unset.
    pub chunk_bucket: Option<String>,
    /// Key prefix for chunk artifacts.
    pub chunk_prefix: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Deadline for one `/analyze` call.
    pub request_timeout_secs: u64,
    /// Retries after the first attempt for storage reads and chunk writes.
    pub storage_max_retries: u32,
    /// Deployment-level chunking overrides.
    pub chunking_env: ChunkingOverrides,
}

/// Supported blob store backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local directory tree.
    #[default]
    Fs,
    /// Plain HTTP object gateway.
    Http,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load `.env` (when present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            storage_backend = ?config.storage_backend,
            storage_root = %config.storage_root.display(),
            chunk_bucket = ?config.chunk_bucket,
            chunk_prefix = %config.chunk_prefix,
            server_port = ?config.server_port,
            request_timeout_secs = config.request_timeout_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let storage_backend = vars
            .parsed("DOCSPLIT_STORAGE_BACKEND")?
            .unwrap_or_default();
        let storage_url = vars.optional("DOCSPLIT_STORAGE_URL");
        if storage_backend == StorageBackend::Http && storage_url.is_none() {
            return Err(ConfigError::MissingVariable("DOCSPLIT_STORAGE_URL".into()));
        }
        Ok(Self {
            storage_backend,
            storage_root: vars
                .optional("DOCSPLIT_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            storage_url,
            chunk_bucket: vars.optional("DOCSPLIT_CHUNK_BUCKET"),
            chunk_prefix: vars
                .optional("DOCSPLIT_CHUNK_PREFIX")
                .unwrap_or_else(|| "chunks".to_string()),
            server_port: vars.parsed("SERVER_PORT")?,
            request_timeout_secs: vars.parsed("DOCSPLIT_REQUEST_TIMEOUT_SECS")?.unwrap_or(900),
            storage_max_retries: vars.parsed("DOCSPLIT_STORAGE_MAX_RETRIES")?.unwrap_or(2),
            chunking_env: ChunkingOverrides {
                strategy: vars.parsed::<ChunkingStrategy>("CHUNKING_STRATEGY")?,
                page_threshold: vars.parsed("PAGE_THRESHOLD")?,
                token_threshold: vars.parsed("TOKEN_THRESHOLD")?,
                chunk_size_pages: vars.parsed("CHUNK_SIZE")?,
                overlap_pages: vars.parsed("OVERLAP_PAGES")?,
                max_tokens_per_chunk: vars.parsed("MAX_TOKENS_PER_CHUNK")?,
                overlap_tokens: vars.parsed("OVERLAP_TOKENS")?,
                target_tokens_per_chunk: vars.parsed("TARGET_TOKENS_PER_CHUNK")?,
                max_pages_per_chunk: vars.parsed("MAX_PAGES_PER_CHUNK")?,
                processing_mode: vars.parsed::<ProcessingMode>("PROCESSING_MODE")?,
                max_concurrency: vars.parsed("MAX_CONCURRENCY")?,
                strict: None,
            },
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fs" | "file" | "filesystem" => Ok(Self::Fs),
            "http" => Ok(Self::Http),
            _ => Err(()),
        }
    }
}
