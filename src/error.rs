//! Custom error types for folo.
//!
//! Provides structured error handling with detailed context so callers can
//! tell apart transient throttling, permanent remote rejections, and local
//! failures programmatically.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for folo operations.
///
/// The transport-facing variants mirror the outcome taxonomy of the remote
/// API: rate limiting and transient failures are retried up to the pacing
/// budget, permanent rejections and authentication failures surface
/// immediately, and `RetriesExhausted` is the terminal "gave up pacing"
/// signal, distinct from any single-attempt failure.
#[derive(Error, Debug)]
pub enum FoloError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file is missing or malformed. Fatal to startup.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    /// A required session credential (cookie) is absent.
    #[error(
        "Missing session credential '{key}'. Log in and update the [session] section of the config."
    )]
    MissingCredential { key: &'static str },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The remote rejected our session credentials. Never retried.
    #[error("Not authenticated (remote code {code}). Refresh your session cookies.")]
    Unauthenticated { code: i64 },

    /// The remote signalled throttling (risk control or HTTP 412/429).
    #[error("Rate limited by the remote (code {code})")]
    RateLimited { code: i64 },

    /// Network failure or a 5xx-family HTTP status.
    #[error("Transient transport failure: {reason}")]
    TransientFailure { reason: String },

    /// The remote returned a non-retryable application error.
    #[error("Remote rejected the request (code {code:?}): {message}")]
    PermanentReject { code: Option<i64>, message: String },

    /// The retry budget was exhausted without a successful attempt.
    #[error("Request failed after {attempts} attempts (retry budget exhausted)")]
    RetriesExhausted { attempts: u32 },

    /// Low-level HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Persisted snapshot could not be written.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entity failed validation during snapshot build.
    #[error("Invalid entity: {reason}")]
    ValidationError { reason: String },

    // =========================================================================
    // Workflow Errors
    // =========================================================================
    /// Another batch workflow is already running.
    #[error("A batch operation is already in progress")]
    Busy,

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Wrapped anyhow error for gradual migration.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for folo operations.
pub type Result<T> = std::result::Result<T, FoloError>;

impl FoloError {
    /// Create a configuration error.
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient transport failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure {
            reason: reason.into(),
        }
    }

    /// Create a permanent rejection.
    pub fn permanent(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::PermanentReject {
            code,
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError {
            reason: reason.into(),
        }
    }

    /// Create a path error with operation context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether this error is terminal for a whole batch (as opposed to a
    /// single item within it).
    #[must_use]
    pub const fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated { .. } | Self::ConfigError { .. } | Self::MissingCredential { .. }
        )
    }
}
