//! Typed error taxonomy shared by the chunking pipeline.
//!
//! Every failure the pipeline can surface is a [`ChunkingError`] tagged with an [`ErrorKind`].
//! The kind decides whether the failure is recoverable (and therefore retried) and is what
//! orchestrating workflows branch on once the error is rendered as an [`ErrorPayload`].

use crate::storage::{StorageError, codes};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Input is not a PDF.
    InvalidFormat,
    /// PDF structure could not be read.
    CorruptedFormat,
    /// PDF is password protected.
    EncryptedFormat,
    /// Chunking parameters are inconsistent.
    ConfigurationError,
    /// Storage refused access.
    StorageAccessDenied,
    /// Storage object or bucket is missing.
    StorageNotFound,
    /// Storage asked the caller to slow down.
    StorageThrottled,
    /// Transient storage failure.
    StorageWriteFailure,
    /// Caller-enforced deadline elapsed.
    Timeout,
    /// Request is missing required fields or names an unsupported content type.
    InvalidRequest,
    /// Failure that fits no other category.
    #[serde(rename = "UnexpectedError")]
    Unexpected,
}

impl ErrorKind {
    /// Whether an error of this kind may succeed on retry.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::StorageThrottled | Self::StorageWriteFailure)
    }

    /// Stable wire name for the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidFormat => "InvalidFormat",
            Self::CorruptedFormat => "CorruptedFormat",
            Self::EncryptedFormat => "EncryptedFormat",
            Self::ConfigurationError => "ConfigurationError",
            Self::StorageAccessDenied => "StorageAccessDenied",
            Self::StorageNotFound => "StorageNotFound",
            Self::StorageThrottled => "StorageThrottled",
            Self::StorageWriteFailure => "StorageWriteFailure",
            Self::Timeout => "Timeout",
            Self::InvalidRequest => "InvalidRequest",
            Self::Unexpected => "UnexpectedError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ChunkingError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: String,
    /// Document the failure belongs to, once known.
    pub document_id: Option<String>,
    /// Structured context (bucket, key, detected type, ...).
    pub details: Map<String, Value>,
}

impl ChunkingError {
    /// Build an error of `kind` with no details.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            document_id: None,
            details: Map::new(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidFormat`].
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, message)
    }

    /// Shorthand for [`ErrorKind::CorruptedFormat`].
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptedFormat, message)
    }

    /// Shorthand for [`ErrorKind::EncryptedFormat`].
    pub fn encrypted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EncryptedFormat, message)
    }

    /// Shorthand for [`ErrorKind::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message)
    }

    /// Shorthand for [`ErrorKind::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Shorthand for [`ErrorKind::Timeout`].
    pub fn timeout(seconds: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Processing did not complete within {seconds} seconds"),
        )
        .with_detail("timeoutSeconds", seconds)
    }

    /// Attach the owning document id unless one is already set.
    pub fn with_document(mut self, document_id: &str) -> Self {
        if self.document_id.is_none() {
            self.document_id = Some(document_id.to_string());
        }
        self
    }

    /// Attach one detail entry.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Whether retrying may help.
    pub fn recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    /// Render the error as the structured body returned to orchestrators.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind,
            message: self.message.clone(),
            recoverable: self.recoverable(),
            details: self.details.clone(),
        }
    }
}

/// Wire form of a [`ChunkingError`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human readable description.
    pub message: String,
    /// Whether the failure is transient.
    pub recoverable: bool,
    /// Structured context.
    pub details: Map<String, Value>,
}

/// Map a storage failure onto the taxonomy by inspecting its error code.
pub fn classify_storage_error(error: &StorageError) -> ChunkingError {
    let kind = match error.code.as_str() {
        codes::ACCESS_DENIED => ErrorKind::StorageAccessDenied,
        codes::NO_SUCH_KEY | codes::NO_SUCH_BUCKET | codes::INVALID_BUCKET_NAME | "NotFound"
        | "404" => ErrorKind::StorageNotFound,
        codes::SLOW_DOWN | "Throttling" | "RequestLimitExceeded" | "TooManyRequests" => {
            ErrorKind::StorageThrottled
        }
        codes::INTERNAL_ERROR
        | codes::SERVICE_UNAVAILABLE
        | codes::NETWORK_ERROR
        | "RequestTimeout" => ErrorKind::StorageWriteFailure,
        _ => ErrorKind::Unexpected,
    };
    let message = match (kind, &error.location) {
        (ErrorKind::StorageAccessDenied, Some(location)) => {
            format!("Access denied to storage location {location}: {}", error.message)
        }
        (ErrorKind::StorageNotFound, Some(location)) => {
            format!("Storage location not found {location}: {}", error.message)
        }
        (ErrorKind::StorageThrottled, _) => format!("Storage throttled: {}", error.message),
        (_, Some(location)) => format!("Storage error at {location}: {}", error.message),
        (_, None) => format!("Storage error: {}", error.message),
    };
    let mut classified = ChunkingError::new(kind, message).with_detail("errorCode", error.code.clone());
    if let Some(location) = &error.location {
        classified = classified
            .with_detail("bucket", location.bucket.clone())
            .with_detail("key", location.key.clone());
    }
    classified
}

/// A blocking task that panicked or was cancelled before producing a result.
pub fn classify_task_failure(task: &str, error: &tokio::task::JoinError) -> ChunkingError {
    let cause = if error.is_panic() { "panicked" } else { "was cancelled" };
    ChunkingError::new(ErrorKind::Unexpected, format!("Task {task} {cause}"))
        .with_detail("task", task)
}

/// Map a PDF parser failure message onto the taxonomy.
///
/// Anything not recognisably an encryption or signature problem is treated as corruption.
pub fn classify_format_error(message: &str) -> ChunkingError {
    let lowered = message.to_lowercase();
    let error = if lowered.contains("encrypted") || lowered.contains("password") {
        ChunkingError::encrypted(format!("PDF is encrypted: {message}"))
    } else if lowered.contains("invalid") || lowered.contains("not a pdf") || lowered.contains("magic")
    {
        ChunkingError::invalid_format(format!("Invalid PDF format: {message}"))
    } else {
        ChunkingError::corrupted(format!("PDF file is corrupted: {message}"))
    };
    error.with_detail("parserError", message)
}
