//! Error types for FactFinder.
//!
//! Library crates use [`FactFinderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Most variants are recovered close to where they occur and surface upward
//! only as missing data. [`FactFinderError::ConfigurationMissing`] is the one
//! kind that should stop the process, and only at startup.

use std::path::PathBuf;

/// Top-level error type for all FactFinder operations.
#[derive(Debug, thiserror::Error)]
pub enum FactFinderError {
    /// A source failed, was blocked, or timed out.
    #[error("source {source_name} unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    /// A source answered but had nothing for the query.
    #[error("no candidate found by {source_name} for {query:?}")]
    NoCandidateFound { source_name: String, query: String },

    /// The structured-extraction backend returned something that does not fit the schema.
    #[error("malformed extraction result: {0}")]
    ExtractionMalformed(String),

    /// A persisted cache file could not be read or parsed.
    #[error("cache at {path:?} is corrupt: {message}")]
    CacheCorrupt { path: PathBuf, message: String },

    /// Required credentials or paths are absent.
    #[error("configuration missing: {message}")]
    ConfigurationMissing { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Response or markup parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// PDF loading or text extraction error.
    #[error("document error: {0}")]
    Document(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FactFinderError>;

impl FactFinderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn source_unavailable(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    pub fn no_candidate(source_name: impl Into<String>, query: impl Into<String>) -> Self {
        Self::NoCandidateFound {
            source_name: source_name.into(),
            query: query.into(),
        }
    }

    /// True for errors that mean "the source had nothing", as opposed to "the source failed".
    pub fn is_no_candidate(&self) -> bool {
        matches!(self, Self::NoCandidateFound { .. })
    }
}
