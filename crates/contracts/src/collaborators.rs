//! External collaborators the core consumes but does not implement.

use serde::{Deserialize, Serialize};

use crate::{
    AcquisitionError, BackendError, Binning, ImageBuffer, PostAction, ScanAxis,
};

/// Microscope control used by the sequencer and the blanker worker
pub trait ScopeControl: Send + Sync {
    fn set_beam_blank(&self, blanked: bool) -> Result<(), BackendError>;

    fn beam_blanked(&self) -> Result<bool, BackendError>;

    /// Whether the viewing screen is down
    fn screen_down(&self) -> Result<bool, BackendError>;

    /// Start raising the viewing screen
    fn raise_screen(&self) -> Result<(), BackendError>;

    fn apply_post_action(&self, action: &PostAction) -> Result<(), BackendError>;

    /// Set the swept axis during a mid-exposure scan
    fn set_scan_value(&self, axis: ScanAxis, value: f64) -> Result<(), BackendError>;
}

/// Status text, failure reports and synchronous confirmation
pub trait StatusSink: Send + Sync {
    fn status(&self, message: &str);

    fn report_failure(&self, error: &AcquisitionError);

    /// Blocking "are you ready?" prompt
    fn confirm(&self, prompt: &str) -> bool;
}

/// Quality of a flyback calibration lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlybackLookup {
    Exact,
    Interpolated,
    Extrapolated,
    /// Only one calibration point was available
    Single,
    None,
    Error,
}

impl FlybackLookup {
    /// Whether the returned values can be used
    pub fn is_usable(&self) -> bool {
        !matches!(self, FlybackLookup::None | FlybackLookup::Error)
    }
}

/// Flyback calibration result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlybackEntry {
    pub kind: FlybackLookup,
    pub flyback_us: f64,
    pub startup_us: f64,
}

/// STEM flyback/startup calibration table
pub trait FlybackTable: Send + Sync {
    fn lookup(&self, binning: Binning, size: u32, mag_index: u32, exposure_s: f64) -> FlybackEntry;
}

/// Image processing invoked when the backend does not process internally
pub trait ImageProcessor: Send + Sync {
    fn dark_subtract(
        &self,
        image: &ImageBuffer,
        dark: &ImageBuffer,
    ) -> Result<ImageBuffer, AcquisitionError>;

    fn gain_normalize(
        &self,
        image: &ImageBuffer,
        dark: &ImageBuffer,
        gain: &ImageBuffer,
    ) -> Result<ImageBuffer, AcquisitionError>;
}
