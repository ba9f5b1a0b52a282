//! Layered error definitions
//!
//! Categorized by source: capture / backend / config

use thiserror::Error;

use crate::Phase;

/// Capture error taxonomy
///
/// Every failure a capture session can surface is one of these kinds. Only
/// [`AcquisitionError::Timeout`] and retryable hardware failures are replayed
/// by the sequencer; everything else goes straight to central cleanup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    /// Idle-poll wait exceeded its allotted time
    #[error("timeout in phase {phase} after {waited_ms}ms")]
    Timeout { phase: Phase, waited_ms: u64 },

    /// Backend or microscope call returned an error
    #[error("hardware call failed: {message}")]
    HardwareCallFailure { message: String, retryable: bool },

    /// Returned image dimensions differ from the resolved geometry
    #[error("image size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Allocation or memory-bound failure
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Illegal or unsatisfiable geometry / timing request
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Halt requested
    #[error("acquisition aborted by user")]
    UserAborted,

    /// State inconsistent, never retried
    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl AcquisitionError {
    /// Create a non-retryable hardware failure
    pub fn hardware(message: impl Into<String>) -> Self {
        Self::HardwareCallFailure {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a hardware failure the sequencer may replay
    pub fn hardware_retryable(message: impl Into<String>) -> Self {
        Self::HardwareCallFailure {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a resource-exhausted error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Whether the sequencer may replay the request after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::HardwareCallFailure { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Short stable label, used for metric labels and status text
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::HardwareCallFailure { .. } => "hardware",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Configuration { .. } => "configuration",
            Self::UserAborted => "user_aborted",
            Self::Fatal { .. } => "fatal",
        }
    }
}

/// Error returned by a backend capability implementation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Vendor message
    pub message: String,
    /// Whether a replay of the same request can reasonably succeed
    pub retryable: bool,
}

impl BackendError {
    /// Create a permanent backend error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a transient backend error
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create the error returned for an unsupported capability
    pub fn unsupported(what: &str) -> Self {
        Self::new(format!("{what} is not supported by this backend"))
    }
}

impl From<BackendError> for AcquisitionError {
    fn from(err: BackendError) -> Self {
        AcquisitionError::HardwareCallFailure {
            message: err.message,
            retryable: err.retryable,
        }
    }
}

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}
