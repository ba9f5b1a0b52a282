//! Backend capability interface
//!
//! One implementation per backend family. The core never branches on which
//! family it is talking to.

use serde::{Deserialize, Serialize};

use crate::{
    BackendError, BackendFamily, CameraId, ImageBuffer, ProcessingMode, ResolvedGeometry,
    TimingPlan,
};

/// Reference image kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Dark,
    Gain,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Dark => "dark",
            ReferenceKind::Gain => "gain",
        }
    }
}

/// Parameters of one image acquisition call
#[derive(Debug, Clone)]
pub struct AcquireParams {
    pub camera: CameraId,
    pub geometry: ResolvedGeometry,
    pub timing: TimingPlan,
    pub processing: ProcessingMode,
    /// Sub-frames to save, 1 when not fractionating
    pub frames: u32,
    pub save_frames: bool,
    pub align_frames: bool,
    pub stem_channels: Vec<u8>,
}

/// Frame alignment statistics reported by aligning backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStats {
    pub mean_shift_px: f64,
    pub max_shift_px: f64,
}

/// Result of one acquisition call
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub image: ImageBuffer,
    pub frames_saved: u32,
    pub alignment: Option<AlignmentStats>,
}

/// Camera backend capability interface
///
/// Calls are blocking and made from worker threads.
pub trait CameraBackend: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// Acquire one image with the resolved geometry and timing
    fn acquire_image(&self, params: &AcquireParams) -> Result<RawCapture, BackendError>;

    /// Acquire one dark or gain reference image
    fn acquire_reference(
        &self,
        kind: ReferenceKind,
        geometry: &ResolvedGeometry,
        exposure_s: f64,
    ) -> Result<ImageBuffer, BackendError>;

    /// Insert (`true`) or retract (`false`) the camera
    fn set_insertion(&self, camera: CameraId, inserted: bool) -> Result<(), BackendError>;

    fn is_inserted(&self, camera: CameraId) -> Result<bool, BackendError>;

    fn select_camera(&self, camera: CameraId) -> Result<(), BackendError>;

    /// Vendor message of the most recent failure
    fn last_error_string(&self) -> Option<String>;

    /// Run a backend-side script
    fn run_script(&self, _script: &str) -> Result<(), BackendError> {
        Err(BackendError::unsupported("scripting"))
    }

    /// Restore saved timing / readout parameters after a failure
    fn restore_defaults(&self) -> Result<(), BackendError> {
        Ok(())
    }

    /// Ask an in-flight acquisition to stop early
    fn request_stop(&self) {}
}
