//! Worker model errors.

use contracts::AcquisitionError;
use thiserror::Error;

/// Worker launch and coordination errors
#[derive(Debug, Error)]
pub enum WorkerError {
    /// OS refused to start the thread
    #[error("failed to spawn {worker} worker: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Another hardware worker is still alive
    #[error("{running} worker still running, cannot start {requested}")]
    Busy {
        running: &'static str,
        requested: &'static str,
    },

    /// Blanker launched without a live acquisition worker
    #[error("blanker worker requires a running acquisition worker")]
    NoAcquisition,

    /// Liveness mutex not released in time
    #[error("liveness handshake held by session {holder}")]
    LivenessHeld { holder: u64 },

    /// Worker thread panicked
    #[error("{worker} worker panicked: {message}")]
    Panicked {
        worker: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;

impl From<WorkerError> for AcquisitionError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Spawn { .. } => AcquisitionError::resource(err.to_string()),
            WorkerError::LivenessHeld { .. } => AcquisitionError::hardware_retryable(err.to_string()),
            WorkerError::Busy { .. } | WorkerError::NoAcquisition | WorkerError::Panicked { .. } => {
                AcquisitionError::fatal(err.to_string())
            }
        }
    }
}
