//! Static per-backend camera descriptors.

use serde::{Deserialize, Serialize};

use crate::{Binning, Roi, SensorTransform};

/// Camera identifier, unique within a profile
pub type CameraId = u32;

/// Backend family tag
///
/// Only used for selection and reporting; the sequencer and normalizer
/// branch on [`Capabilities`] and [`SizeRestriction`], never on family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Gatan,
    Tietz,
    Fei,
    DirectElectron,
    Plugin,
    Amt,
    Simulated,
}

impl BackendFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendFamily::Gatan => "gatan",
            BackendFamily::Tietz => "tietz",
            BackendFamily::Fei => "fei",
            BackendFamily::DirectElectron => "direct_electron",
            BackendFamily::Plugin => "plugin",
            BackendFamily::Amt => "amt",
            BackendFamily::Simulated => "simulated",
        }
    }
}

/// Kind of shutter a backend offers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterKind {
    /// Film / pre-specimen shutters driven by the camera
    #[default]
    Physical,
    /// Camera can only request beam blanking
    BeamBlankOnly,
    /// No shutter at all: the core blanks and unblanks explicitly
    None,
}

/// One supported subarea size on restricted-subarea backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubareaSize {
    /// Unbinned width
    pub width: u32,
    /// Unbinned height
    pub height: u32,
}

/// Size and offset alignment rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SizeRestriction {
    /// Any size that is a multiple of the binning
    #[default]
    None,
    /// Binned size and offset must be multiples of the given moduli
    Modulo {
        size_x: u32,
        size_y: u32,
        offset_x: u32,
        offset_y: u32,
    },
    /// Unbinned start and end must lie on a block boundary
    Block { block: u32 },
    /// Only a fixed set of centered subarea sizes is supported
    Subareas { sizes: Vec<SubareaSize> },
}

/// Timing constants of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConstants {
    /// Time from trigger to stable beam/shutter state
    pub startup_delay_ms: f64,
    /// Settling already included by the backend before each shot
    pub built_in_settling_s: f64,
    /// Smallest drift settle the backend can honour
    pub min_drift_s: f64,
    /// Extra beam time added when shutter feedback is unreliable
    pub extra_beam_time_s: f64,
    /// Readout dead time after exposure
    pub dead_time_ms: f64,
    /// Fixed delay after an insertion command before polling completion
    pub insertion_delay_ms: u64,
    /// Margin added to every worker timeout
    pub timeout_margin_ms: u64,
    /// STEM flyback used when no calibration entry exists
    pub default_flyback_us: f64,
    /// STEM startup used when no calibration entry exists
    pub default_scan_startup_us: f64,
    /// Readout overhead per saved frame
    pub per_frame_readout_ms: f64,
}

impl Default for TimingConstants {
    fn default() -> Self {
        Self {
            startup_delay_ms: 0.0,
            built_in_settling_s: 0.0,
            min_drift_s: 0.0,
            extra_beam_time_s: 0.0,
            dead_time_ms: 0.0,
            insertion_delay_ms: 0,
            timeout_margin_ms: 2000,
            default_flyback_us: 500.0,
            default_scan_startup_us: 0.0,
            per_frame_readout_ms: 0.0,
        }
    }
}

/// Capability flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub shutter: ShutterKind,
    /// Whether the backend reports the true end of beam exposure
    pub reliable_shutter_feedback: bool,
    pub can_save_frames: bool,
    pub can_align_frames: bool,
    pub is_stem: bool,
    /// STEM detector that is only usable with the viewing screen raised
    pub screen_coupled_stem: bool,
    /// Camera or detector must be physically inserted
    pub retractable: bool,
    /// Dark/gain processing happens inside the backend
    pub processes_internally: bool,
    /// Ask the status collaborator before inserting
    pub confirm_insertion: bool,
    pub supports_scripts: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            shutter: ShutterKind::Physical,
            reliable_shutter_feedback: true,
            can_save_frames: false,
            can_align_frames: false,
            is_stem: false,
            screen_coupled_stem: false,
            retractable: false,
            processes_internally: false,
            confirm_insertion: false,
            supports_scripts: false,
        }
    }
}

/// Static capability record for one camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: CameraId,
    pub name: String,
    pub family: BackendFamily,
    /// Native (display-space) sensor width in unbinned pixels
    pub sensor_width: u32,
    /// Native (display-space) sensor height in unbinned pixels
    pub sensor_height: u32,
    /// Supported binnings, ascending
    pub binnings: Vec<Binning>,
    #[serde(default)]
    pub restriction: SizeRestriction,
    #[serde(default)]
    pub transform: SensorTransform,
    #[serde(default)]
    pub timing: TimingConstants,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl CameraDescriptor {
    /// Screen must be raised for TEM cameras and screen-coupled STEM detectors
    pub fn needs_screen_raise(&self) -> bool {
        !self.capabilities.is_stem || self.capabilities.screen_coupled_stem
    }

    pub fn full_roi(&self) -> Roi {
        Roi::full(self.sensor_width, self.sensor_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(is_stem: bool, coupled: bool) -> CameraDescriptor {
        CameraDescriptor {
            id: 1,
            name: "cam".into(),
            family: BackendFamily::Simulated,
            sensor_width: 1024,
            sensor_height: 1024,
            binnings: vec![1, 2],
            restriction: SizeRestriction::None,
            transform: SensorTransform::default(),
            timing: TimingConstants::default(),
            capabilities: Capabilities {
                is_stem,
                screen_coupled_stem: coupled,
                ..Capabilities::default()
            },
        }
    }

    #[test]
    fn test_screen_raise_rule() {
        assert!(descriptor(false, false).needs_screen_raise());
        assert!(!descriptor(true, false).needs_screen_raise());
        assert!(descriptor(true, true).needs_screen_raise());
    }

    #[test]
    fn test_restriction_serde_tag() {
        let json = r#"{"type":"modulo","size_x":64,"size_y":64,"offset_x":32,"offset_y":32}"#;
        let restriction: SizeRestriction = serde_json::from_str(json).unwrap();
        assert_eq!(
            restriction,
            SizeRestriction::Modulo {
                size_x: 64,
                size_y: 64,
                offset_x: 32,
                offset_y: 32
            }
        );
    }
}
