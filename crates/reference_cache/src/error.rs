//! Reference cache errors

use contracts::AcquisitionError;
use thiserror::Error;

use crate::EntryId;

/// Reference cache error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// Entry was evicted or never existed
    #[error("unknown cache entry {0}")]
    UnknownEntry(EntryId),

    /// A single reference exceeds the whole memory bound
    #[error("reference of {bytes} bytes exceeds cache bound of {bound} bytes")]
    TooLarge { bytes: usize, bound: usize },

    /// Bracketing references have different dimensions
    #[error("reference size mismatch: {lower:?} vs {upper:?}")]
    SizeMismatch {
        lower: (u32, u32),
        upper: (u32, u32),
    },

    /// Bracketing exposures do not enclose a range
    #[error("invalid interpolation bracket [{lower_s}, {upper_s}]")]
    InvalidBracket { lower_s: f64, upper_s: f64 },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<CacheError> for AcquisitionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::TooLarge { .. } => AcquisitionError::resource(err.to_string()),
            CacheError::UnknownEntry(_) => AcquisitionError::fatal(err.to_string()),
            CacheError::SizeMismatch { lower, upper } => AcquisitionError::SizeMismatch {
                expected: lower,
                actual: upper,
            },
            CacheError::InvalidBracket { .. } => AcquisitionError::configuration(err.to_string()),
        }
    }
}
