//! Error types for media-harvest
//!
//! Errors are split by how far they are allowed to travel:
//! - [`Error`] is the run-level error returned from the public API
//! - [`SourceError`] is what a [`MessageSource`](crate::source::MessageSource) reports
//! - [`FailureReason`] describes a single message that could not be harvested;
//!   it is collected into the run report and never propagated as an `Err`

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by the message source
    #[error("message source error: {0}")]
    Source(#[from] SourceError),

    /// The target channel could not be resolved; nothing was scanned
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Shutdown in progress - not scheduling new work
    #[error("shutdown in progress: not scheduling new work")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Source(e) => e.error_code(),
            Error::ChannelUnavailable(_) => "channel_unavailable",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Errors reported by a message source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The remote asked us to back off for the given duration
    #[error("rate limited, retry after {}s", wait.as_secs())]
    RateLimited {
        /// Server-specified wait before the next request
        wait: Duration,
    },

    /// Requested message, media or user does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Connection, timeout or other transport hiccup
    #[error("transport error: {0}")]
    Transport(String),

    /// The source cannot perform the request (e.g. unsupported media)
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::NotFound(_) => "not_found",
            SourceError::Transport(_) => "transport_error",
            SourceError::Unsupported(_) => "unsupported",
        }
    }
}

/// Why a single message could not be harvested
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The message no longer exists at the source
    #[error("message not found")]
    MessageNotFound,

    /// The message exists but carries no downloadable media
    #[error("message has no media")]
    NoMedia,

    /// The file was missing when verified
    #[error("not found")]
    FileNotFound,

    /// The file on disk does not have the size reported at download time
    #[error("size mismatch: expected {expected} got {actual}")]
    SizeMismatch {
        /// Bytes reported by the source when the fetch completed
        expected: u64,
        /// Bytes found on disk
        actual: u64,
    },

    /// Every allowed attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The error from the final attempt
        last_error: String,
    },

    /// Non-retryable fetch failure
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Copying an existing file between category directories failed
    #[error("copy failed: {0}")]
    Copy(String),
}

impl FailureReason {
    /// Machine-readable failure code
    pub fn code(&self) -> &str {
        match self {
            FailureReason::MessageNotFound => "message_not_found",
            FailureReason::NoMedia => "no_media",
            FailureReason::FileNotFound => "file_not_found",
            FailureReason::SizeMismatch { .. } => "size_mismatch",
            FailureReason::RetriesExhausted { .. } => "retries_exhausted",
            FailureReason::Fetch(_) => "fetch_failed",
            FailureReason::Copy(_) => "copy_failed",
        }
    }
}
