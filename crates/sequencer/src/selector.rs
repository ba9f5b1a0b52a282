//! Backend selection
//!
//! The active camera is a field of the selector owned by the sequencer, not
//! process-wide state.

use std::fmt;
use std::sync::Arc;

use contracts::{AcquisitionError, CameraBackend, CameraDescriptor, CameraId};
use tracing::{debug, info, warn};

/// One registered camera
#[derive(Clone)]
pub struct CameraSlot {
    pub descriptor: CameraDescriptor,
    pub backend: Arc<dyn CameraBackend>,
}

impl fmt::Debug for CameraSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSlot")
            .field("id", &self.descriptor.id)
            .field("family", &self.backend.family())
            .finish()
    }
}

/// Registered cameras and the active index
#[derive(Debug, Default)]
pub struct BackendSelector {
    slots: Vec<CameraSlot>,
    active: Option<usize>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: CameraDescriptor,
        backend: Arc<dyn CameraBackend>,
    ) -> Result<(), AcquisitionError> {
        if self.slots.iter().any(|s| s.descriptor.id == descriptor.id) {
            return Err(AcquisitionError::configuration(format!(
                "camera {} registered twice",
                descriptor.id
            )));
        }
        debug!(camera = descriptor.id, family = backend.family().as_str(), "camera registered");
        self.slots.push(CameraSlot {
            descriptor,
            backend,
        });
        Ok(())
    }

    pub fn slot(&self, camera: CameraId) -> Option<&CameraSlot> {
        self.slots.iter().find(|s| s.descriptor.id == camera)
    }

    pub fn descriptor(&self, camera: CameraId) -> Option<&CameraDescriptor> {
        self.slot(camera).map(|s| &s.descriptor)
    }

    pub fn cameras(&self) -> impl Iterator<Item = &CameraDescriptor> {
        self.slots.iter().map(|s| &s.descriptor)
    }

    pub fn active(&self) -> Option<&CameraSlot> {
        self.active.and_then(|i| self.slots.get(i))
    }

    pub fn active_id(&self) -> Option<CameraId> {
        self.active().map(|s| s.descriptor.id)
    }

    /// Make `camera` the active camera
    ///
    /// Selects it on its backend and retracts the previously active camera
    /// when that one is retractable.
    pub fn activate(&mut self, camera: CameraId) -> Result<&CameraSlot, AcquisitionError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.descriptor.id == camera)
            .ok_or_else(|| AcquisitionError::configuration(format!("unknown camera {camera}")))?;

        if self.active != Some(index) {
            if let Some(previous) = self.active.and_then(|i| self.slots.get(i)) {
                if previous.descriptor.capabilities.retractable {
                    let id = previous.descriptor.id;
                    if let Err(e) = previous.backend.set_insertion(id, false) {
                        warn!(camera = id, error = %e, "failed to retract previous camera");
                    }
                }
            }
            self.slots[index].backend.select_camera(camera)?;
            info!(camera, previous = ?self.active_id(), "camera selected");
            self.active = Some(index);
        }
        Ok(&self.slots[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::{descriptor_for, SimulatedCamera};
    use contracts::BackendFamily;

    #[test]
    fn test_switch_retracts_previous() {
        let gatan = Arc::new(SimulatedCamera::new());
        let fei = Arc::new(SimulatedCamera::new());
        let mut selector = BackendSelector::new();
        selector
            .register(descriptor_for(BackendFamily::Gatan, 1, "k3"), gatan.clone())
            .unwrap();
        selector
            .register(descriptor_for(BackendFamily::Fei, 2, "ceta"), fei.clone())
            .unwrap();

        gatan.set_insertion(1, true).unwrap();
        selector.activate(1).unwrap();
        assert_eq!(gatan.selected_camera(), Some(1));
        assert!(gatan.is_inserted(1).unwrap());

        selector.activate(2).unwrap();
        assert_eq!(fei.selected_camera(), Some(2));
        assert!(!gatan.is_inserted(1).unwrap());
        assert_eq!(selector.active_id(), Some(2));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let backend = Arc::new(SimulatedCamera::new());
        let mut selector = BackendSelector::new();
        let d = descriptor_for(BackendFamily::Simulated, 1, "sim");
        selector.register(d.clone(), backend.clone()).unwrap();
        assert!(selector.register(d, backend).is_err());
        assert!(matches!(
            selector.activate(9),
            Err(AcquisitionError::Configuration { .. })
        ));
    }
}
