//! Error types for CLI operations.

use contracts::{AcquisitionError, CameraId};
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Profile file not found
    #[error("Profile not found: {path}")]
    ProfileNotFound { path: String },

    /// Control set missing from the profile
    #[error("Control set '{name}' is not defined in the profile")]
    UnknownControlSet { name: String },

    /// Camera referenced but never described
    #[error("Camera {id} has no descriptor in the profile")]
    UnknownCamera { id: CameraId },

    /// Capture session failed
    #[error("Capture failed: {0}")]
    Capture(#[from] AcquisitionError),

    /// Session did not end in time
    #[error("Session did not finish within {seconds}s")]
    SessionTimeout { seconds: u64 },
}

impl CliError {
    pub fn profile_not_found(path: impl Into<String>) -> Self {
        Self::ProfileNotFound { path: path.into() }
    }

    pub fn unknown_control_set(name: impl Into<String>) -> Self {
        Self::UnknownControlSet { name: name.into() }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
