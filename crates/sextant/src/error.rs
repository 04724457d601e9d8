//! Error types for sextant operations.
//!
//! Errors are categorized into three main types:
//!
//! - **`Error`**: Top-level errors that fail a single call (bad query
//!   parameters, unknown nodes, missing graph, infrastructure failures)
//! - **`AnalysisError`**: File-level errors that are collected but never halt a batch
//! - **`CacheError`**: Cache I/O failures; the cache degrades to pass-through
//!   for the affected operation instead of failing the batch
//!
//! ## Error Philosophy
//!
//! Indexing is "best effort":
//! - A single file an extractor chokes on shouldn't prevent indexing the rest
//! - Errors are collected and reported, not thrown
//! - Query errors fail only that query and never touch the active graph snapshot
//!
//! ## Error Categorization
//!
//! `AnalysisErrorKind` uses a 4xx/5xx style categorization:
//! - Input problems (the source's fault): extraction failures, invalid records
//! - Internal problems (our fault): I/O errors, panicking extractors

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result type for sextant operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for sextant operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A query or option parameter is missing or out of range
    #[error("invalid {parameter}: {message}")]
    Validation {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A named node does not exist in the graph snapshot
    #[error("node not found: {0}")]
    NotFound(String),

    /// A query was issued against an empty or unbuilt graph
    #[error("graph unavailable: {0}")]
    Graph(String),

    /// Cache infrastructure failed outside a degradable operation
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation (worker pool, poisoned lock)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(parameter: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            parameter,
            message: message.into(),
        }
    }
}

/// Failure of the on-disk cache area.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed
    #[error("cache I/O at {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A cache file exists but does not hold a valid entry
    #[error("corrupt cache entry at {}: {reason}", path.display())]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// An entry could not be serialized
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error encountered while analyzing a specific file.
///
/// These errors are collected during a batch but don't halt it. Concurrent
/// callers coalesced onto one extraction all receive a clone of the same error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisError {
    /// Path to the file that failed
    pub path: PathBuf,
    /// Category of the error
    pub kind: AnalysisErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.path.display(),
            self.message,
            self.kind
        )
    }
}

impl std::error::Error for AnalysisError {}

/// Categorization of analysis errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisErrorKind {
    // === Input Problems (analogous to HTTP 4xx) ===
    /// The extractor could not make sense of the file
    ExtractionFailed,

    /// The extractor returned a record that fails normalization
    InvalidRecord,

    /// No extractor is registered for the detected kind
    UnsupportedKind,

    // === Internal Problems (analogous to HTTP 5xx) ===
    /// Could not read or stat the file
    Io,

    /// The extractor panicked
    Panicked,
}

impl std::fmt::Display for AnalysisErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtractionFailed => write!(f, "extraction failed"),
            Self::InvalidRecord => write!(f, "invalid record"),
            Self::UnsupportedKind => write!(f, "unsupported kind"),
            Self::Io => write!(f, "I/O error"),
            Self::Panicked => write!(f, "extractor panicked"),
        }
    }
}

impl AnalysisErrorKind {
    /// Returns `true` if this is an input problem (4xx-style).
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed | Self::InvalidRecord | Self::UnsupportedKind
        )
    }

    /// Returns `true` if this is an internal problem (5xx-style).
    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        matches!(self, Self::Io | Self::Panicked)
    }
}

impl AnalysisError {
    /// Create a new analysis error.
    #[must_use]
    pub fn new(path: PathBuf, kind: AnalysisErrorKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }

    /// Create an extraction failure for a file.
    #[must_use]
    pub fn extraction_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(path, AnalysisErrorKind::ExtractionFailed, message)
    }

    /// Create an invalid-record error for a file.
    #[must_use]
    pub fn invalid_record(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(path, AnalysisErrorKind::InvalidRecord, message)
    }

    /// Create an unsupported-kind error.
    #[must_use]
    pub fn unsupported_kind(path: PathBuf, kind: crate::types::ComponentKind) -> Self {
        Self::new(
            path,
            AnalysisErrorKind::UnsupportedKind,
            format!("no extractor registered for {kind} files"),
        )
    }

    /// Create an I/O error for a file.
    #[must_use]
    pub fn io_error(path: PathBuf, error: &std::io::Error) -> Self {
        Self::new(path, AnalysisErrorKind::Io, error.to_string())
    }

    /// Create an error for an extractor that panicked.
    #[must_use]
    pub fn panicked(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(path, AnalysisErrorKind::Panicked, message)
    }
}
