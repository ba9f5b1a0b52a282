//! Capture request ("control set") contracts.

use serde::{Deserialize, Serialize};

use crate::{Binning, CameraId, Roi, ScanPlan};

/// Reference processing applied to the raw image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Unprocessed,
    DarkSubtracted,
    GainNormalized,
}

impl ProcessingMode {
    pub fn needs_dark(&self) -> bool {
        matches!(
            self,
            ProcessingMode::DarkSubtracted | ProcessingMode::GainNormalized
        )
    }

    pub fn needs_gain(&self) -> bool {
        matches!(self, ProcessingMode::GainNormalized)
    }
}

/// Requested shuttering strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterMode {
    FilmShutter,
    #[default]
    BeamBlank,
    DualShutter,
}

/// Single shot or repeated acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    #[default]
    Single,
    Continuous,
}

/// Which named control set a request was built from
///
/// Used as the request-kind half of the per-group dark reference cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSetKind {
    View,
    Focus,
    Trial,
    #[default]
    Record,
    Preview,
    Search,
    Montage,
}

impl ControlSetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSetKind::View => "view",
            ControlSetKind::Focus => "focus",
            ControlSetKind::Trial => "trial",
            ControlSetKind::Record => "record",
            ControlSetKind::Preview => "preview",
            ControlSetKind::Search => "search",
            ControlSetKind::Montage => "montage",
        }
    }
}

/// Dose fractionation and frame saving options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSaving {
    pub dose_fractionation: bool,
    pub save_frames: bool,
    pub align_frames: bool,
    /// Sub-frame time in seconds
    pub frame_time_s: f64,
}

impl FrameSaving {
    /// Number of sub-frames for an exposure, 1 when not fractionating
    pub fn frame_count(&self, exposure_s: f64) -> u32 {
        if !self.dose_fractionation || self.frame_time_s <= 0.0 {
            return 1;
        }
        ((exposure_s / self.frame_time_s).round() as u32).max(1)
    }
}

/// A named, mutable set of capture parameters
///
/// The sequencer clones the request when a capture starts so callers may keep
/// mutating their copy while the session is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// Control set name
    pub name: String,

    #[serde(default)]
    pub kind: ControlSetKind,

    /// Target camera
    pub camera: CameraId,

    /// Requested ROI, `None` means full sensor
    #[serde(default)]
    pub roi: Option<Roi>,

    #[serde(default = "default_binning")]
    pub binning: Binning,

    /// Exposure in seconds
    pub exposure_s: f64,

    #[serde(default)]
    pub processing: ProcessingMode,

    #[serde(default)]
    pub shutter: ShutterMode,

    /// Requested drift settle in seconds
    #[serde(default)]
    pub drift_settle_s: f64,

    #[serde(default)]
    pub mode: AcquisitionMode,

    #[serde(default)]
    pub frames: FrameSaving,

    /// Selected STEM channels, empty for TEM cameras
    #[serde(default)]
    pub stem_channels: Vec<u8>,

    /// Magnification index, used by STEM flyback lookup
    #[serde(default)]
    pub mag_index: u32,

    /// Always acquire a fresh dark reference
    #[serde(default)]
    pub force_new_dark: bool,

    /// Optional mid-exposure scan handled by the blanker
    #[serde(default)]
    pub scan: Option<ScanPlan>,

    /// Optional backend script run before the exposure
    #[serde(default)]
    pub pre_script: Option<String>,
}

fn default_binning() -> Binning {
    1
}

impl CaptureRequest {
    /// Minimal request for a camera, everything else defaulted
    pub fn new(name: impl Into<String>, camera: CameraId, exposure_s: f64) -> Self {
        Self {
            name: name.into(),
            kind: ControlSetKind::default(),
            camera,
            roi: None,
            binning: default_binning(),
            exposure_s,
            processing: ProcessingMode::default(),
            shutter: ShutterMode::default(),
            drift_settle_s: 0.0,
            mode: AcquisitionMode::default(),
            frames: FrameSaving::default(),
            stem_channels: Vec::new(),
            mag_index: 0,
            force_new_dark: false,
            scan: None,
            pre_script: None,
        }
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_binning(mut self, binning: Binning) -> Self {
        self.binning = binning;
        self
    }

    pub fn with_processing(mut self, processing: ProcessingMode) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_shutter(mut self, shutter: ShutterMode) -> Self {
        self.shutter = shutter;
        self
    }

    pub fn with_kind(mut self, kind: ControlSetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.mode = AcquisitionMode::Continuous;
        self
    }

    pub fn is_continuous(&self) -> bool {
        self.mode == AcquisitionMode::Continuous
    }
}
