//! STEM scan timing from the flyback calibration table.

use contracts::{CameraDescriptor, CaptureRequest, FlybackLookup, FlybackTable, ResolvedGeometry};
use tracing::{debug, warn};

/// Per-frame scan timing of a STEM acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemScanTiming {
    /// Lookup quality reported by the table
    pub lookup: FlybackLookup,
    /// The descriptor defaults were used instead of the table
    pub used_default: bool,
    pub flyback_us: f64,
    pub startup_us: f64,
    /// Dwell plus flyback for one line
    pub line_time_us: f64,
    /// Startup plus all lines
    pub frame_time_ms: f64,
}

/// Compute line and frame time of a STEM scan
///
/// The request exposure is the integration time of one frame, spread over
/// the lines of the resolved image. Falls back to the descriptor's default
/// flyback and startup when the table has no usable entry.
pub fn stem_scan_timing(
    request: &CaptureRequest,
    geometry: &ResolvedGeometry,
    descriptor: &CameraDescriptor,
    table: &dyn FlybackTable,
) -> StemScanTiming {
    let (width, height) = geometry.image_size();
    let entry = table.lookup(geometry.binning, width, request.mag_index, request.exposure_s);

    let used_default = !entry.kind.is_usable();
    let (flyback_us, startup_us) = if used_default {
        warn!(
            camera = descriptor.id,
            binning = geometry.binning,
            width,
            mag_index = request.mag_index,
            lookup = ?entry.kind,
            "no flyback calibration, using descriptor default"
        );
        (
            descriptor.timing.default_flyback_us,
            descriptor.timing.default_scan_startup_us,
        )
    } else {
        (entry.flyback_us.max(0.0), entry.startup_us.max(0.0))
    };

    let lines = height.max(1) as f64;
    let dwell_us = request.exposure_s.max(0.0) * 1_000_000.0 / lines;
    let line_time_us = dwell_us + flyback_us;
    let frame_time_ms = (startup_us + line_time_us * lines) / 1000.0;

    debug!(
        camera = descriptor.id,
        lookup = ?entry.kind,
        flyback_us,
        startup_us,
        frame_time_ms,
        "stem scan timing"
    );

    StemScanTiming {
        lookup: entry.kind,
        used_default,
        flyback_us,
        startup_us,
        line_time_us,
        frame_time_ms,
    }
}
