//! Error types for PinDrop
//!
//! All errors in the engine are converted to `EngineError`, which carries
//! the submission-flow taxonomy plus the ambient failure modes. The host UI
//! renders errors through `user_message()`. Suppression of transient
//! location noise happens at the provider level
//! (`location::LocationError::should_surface`); every `EngineError` a flow
//! returns is meant to reach the user.

use thiserror::Error;

/// Classified reason for a failed video upload
///
/// Produced by the blob store client and reported through
/// `UploadJobState::Failed`. The already-persisted pin is never rolled back
/// on upload failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UploadFailure {
    /// Network-level failure talking to the blob store
    #[error("network error: {0}")]
    Network(String),

    /// Storage quota exhausted
    #[error("storage quota exceeded")]
    Quota,

    /// Rejected by the storage access policy
    #[error("storage permission denied")]
    PermissionDenied,

    /// Source file exceeds the storage-rule size ceiling
    #[error("file of {0} bytes exceeds the storage size limit")]
    TooLarge(u64),

    /// Anything else (encoder I/O, missing file, malformed response)
    #[error("{0}")]
    Other(String),
}

/// Engine-wide error type
///
/// The first six variants are the submission-flow taxonomy surfaced to the
/// host UI; the rest are ambient failures (configuration, wrapped causes).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Location authorization denied or restricted; requires the user to
    /// change settings before retrying
    #[error("Location permission required")]
    PermissionDenied,

    /// No location fix, or the latest fix is older than the staleness window
    #[error("Current location unknown")]
    LocationUnknown,

    /// Candidate coordinate is outside the drop radius
    #[error("Too far from your location ({distance_m:.0} m away)")]
    TooFar {
        /// Great-circle distance from the latest fix, in meters
        distance_m: f64,
    },

    /// Remote document store write/read failed; the draft is discarded
    #[error("Could not save the report: {0}")]
    Persistence(String),

    /// Video upload reached a terminal failure (the pin itself survives)
    #[error("Video upload failed: {0}")]
    UploadFailed(#[from] UploadFailure),

    /// Operation rejected by admission control (double submission,
    /// duplicate upload for the same pin, superseded pending action)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Input failed validation (coordinate out of range, unknown incident type)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Blob storage error outside the upload pipeline (e.g. object delete)
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl EngineError {
    /// Human-readable message for the host UI
    ///
    /// Internal causes are collapsed to a generic message; the flow
    /// taxonomy renders its display string directly.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::HttpClient(_) | EngineError::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
