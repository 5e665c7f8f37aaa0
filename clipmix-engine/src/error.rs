//! Error types for clipmix-engine
//!
//! Per-clip failures never leave the engine task; these types surface from
//! construction, configuration and the handle API, and travel inside the
//! engine as [`LoadError`] values.

use serde::Serialize;
use thiserror::Error;

/// Main error type for clipmix-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors (includes rejected playback start)
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Asset load errors
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The engine task has shut down (disposed or panicked)
    #[error("Engine closed")]
    EngineClosed,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared model crate
    #[error(transparent)]
    Common(#[from] clipmix_common::Error),
}

/// Convenience Result type using clipmix-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single asset load.
///
/// Cloneable so one in-flight load can report the same outcome to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LoadError {
    /// Source could not be read (missing file, network, permissions)
    #[error("Failed to fetch {uri}: {reason}")]
    Fetch { uri: String, reason: String },

    /// Source was read but could not be decoded
    #[error("Failed to decode {uri}: {reason}")]
    Decode { uri: String, reason: String },

    /// No URI has ever been seen for this asset
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    /// Automatic retries used up; needs an explicit retry request
    #[error("Asset {asset_id} failed {attempts} times; waiting for explicit retry")]
    RetriesExhausted { asset_id: String, attempts: u32 },

    /// An automatic retry is already scheduled for this asset
    #[error("Asset {0} is waiting for a scheduled retry")]
    RetryPending(String),

    /// The cache was disposed while the load was in flight
    #[error("Asset cache disposed")]
    Disposed,
}

impl LoadError {
    /// Whether this outcome counts as a failed attempt (as opposed to a
    /// load that was skipped without touching the loader).
    pub fn is_attempt_failure(&self) -> bool {
        matches!(self, LoadError::Fetch { .. } | LoadError::Decode { .. })
    }
}
