//! # Normalizer
//!
//! Geometry & timing normalization: pure functions mapping a capture request
//! and a camera descriptor to a legal ROI/binning and to a backend-specific
//! shutter/blanking timing plan.
//!
//! Nothing here branches on the backend family; every decision comes from the
//! descriptor's restriction rule, timing constants and capability flags.

mod geometry;
mod stem;
mod timing;
pub mod transform;

pub use geometry::{clamp_binning, resolve_geometry, satisfies_restriction};
pub use stem::{stem_scan_timing, StemScanTiming};
pub use timing::{effective_drift_s, resolve_timing};

use contracts::{AcquisitionError, CameraDescriptor, CaptureRequest, ResolvedGeometry, TimingPlan};

/// Resolve geometry and timing of a request in one call
pub fn normalize(
    request: &CaptureRequest,
    descriptor: &CameraDescriptor,
) -> Result<(ResolvedGeometry, TimingPlan), AcquisitionError> {
    let geometry = resolve_geometry(request.roi, request.binning, descriptor)?;
    let timing = resolve_timing(request, descriptor)?;
    Ok((geometry, timing))
}
