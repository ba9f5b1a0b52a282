//! # Backends
//!
//! In-process implementations of the hardware-facing traits:
//! - [`SimulatedCamera`]: a [`contracts::CameraBackend`] with fault injection
//! - [`SimulatedScope`]: a [`contracts::ScopeControl`] that records calls
//! - [`RecordingStatus`]: a [`contracts::StatusSink`]
//! - [`CalibrationTable`]: a [`contracts::FlybackTable`]
//! - Descriptor presets per backend family

mod camera;
mod flyback;
mod presets;
mod scope;
mod status;

use std::sync::{Mutex, MutexGuard};

pub use camera::{SimulatedCamera, SimulatedConfig};
pub use flyback::{CalibrationTable, FlybackPoint};
pub use presets::{descriptor_for, stem_detector};
pub use scope::{ScopeConfig, ScopeEvent, SimulatedScope};
pub use status::RecordingStatus;

/// Lock that survives a poisoned mutex
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
