//! Acquisition profile: the unit loaded by the config loader.

use serde::{Deserialize, Serialize};

use crate::{AcquisitionConfig, CameraDescriptor, CameraId, CaptureRequest};

/// Profile format version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Cameras, core configuration and named control sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionProfile {
    #[serde(default)]
    pub version: ConfigVersion,

    pub cameras: Vec<CameraDescriptor>,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub control_sets: Vec<CaptureRequest>,
}

impl AcquisitionProfile {
    pub fn camera(&self, id: CameraId) -> Option<&CameraDescriptor> {
        self.cameras.iter().find(|c| c.id == id)
    }

    pub fn control_set(&self, name: &str) -> Option<&CaptureRequest> {
        self.control_sets.iter().find(|r| r.name == name)
    }
}
