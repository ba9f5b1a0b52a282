//! Shutter / blanking timing resolution.

use contracts::{
    AcquisitionError, BlankerEvent, BlankerStep, CameraDescriptor, CaptureRequest, ShutterKind,
    ShutterMode, ShutterSelection, TimingPlan,
};
use tracing::debug;

/// Drift settle the core must add, in seconds
///
/// The larger of requested and built-in settling minus the built-in part,
/// raised to the backend minimum when non-zero.
pub fn effective_drift_s(requested_s: f64, built_in_s: f64, min_drift_s: f64) -> f64 {
    let drift = requested_s.max(built_in_s) - built_in_s;
    if drift > 0.0 && drift < min_drift_s {
        min_drift_s
    } else {
        drift.max(0.0)
    }
}

/// Compute the timing plan of one acquisition
pub fn resolve_timing(
    request: &CaptureRequest,
    descriptor: &CameraDescriptor,
) -> Result<TimingPlan, AcquisitionError> {
    if !(request.exposure_s >= 0.0) || !request.exposure_s.is_finite() {
        return Err(AcquisitionError::configuration(format!(
            "exposure must be a finite non-negative time, got {}",
            request.exposure_s
        )));
    }
    if !(request.drift_settle_s >= 0.0) || !request.drift_settle_s.is_finite() {
        return Err(AcquisitionError::configuration(format!(
            "drift settle must be a finite non-negative time, got {}",
            request.drift_settle_s
        )));
    }

    let t = &descriptor.timing;
    let caps = &descriptor.capabilities;
    let exposure_ms = request.exposure_s * 1000.0;
    let drift_ms =
        effective_drift_s(request.drift_settle_s, t.built_in_settling_s, t.min_drift_s) * 1000.0;
    let startup_ms = t.startup_delay_ms.max(0.0);
    let extra_beam_ms = t.extra_beam_time_s.max(0.0) * 1000.0;
    let dead_ms = t.dead_time_ms.max(0.0);

    let plan = match caps.shutter {
        ShutterKind::None => {
            // Beam stays blanked until the camera is actually integrating
            let inflated = exposure_ms + drift_ms + extra_beam_ms;
            let reblank = startup_ms + inflated + dead_ms;
            TimingPlan {
                exposure_ms: inflated,
                requested_exposure_ms: exposure_ms,
                drift_settle_ms: drift_ms,
                startup_delay_ms: startup_ms,
                shutter: ShutterSelection::Software,
                pre_exposure: vec![
                    BlankerStep {
                        at_ms: 0.0,
                        event: BlankerEvent::Blank,
                    },
                    BlankerStep {
                        at_ms: startup_ms,
                        event: BlankerEvent::Unblank,
                    },
                ],
                reblank_at_ms: Some(reblank),
                post_action_delay_ms: reblank,
                total_ms: reblank,
                shutter_fallback: request.shutter != ShutterMode::BeamBlank,
            }
        }
        kind => {
            let (shutter, fallback) = select_shutter(request.shutter, kind);
            let mut post = startup_ms + drift_ms + exposure_ms;
            if !caps.reliable_shutter_feedback {
                post += extra_beam_ms;
            }
            TimingPlan {
                exposure_ms,
                requested_exposure_ms: exposure_ms,
                drift_settle_ms: drift_ms,
                startup_delay_ms: startup_ms,
                shutter,
                pre_exposure: Vec::new(),
                reblank_at_ms: None,
                post_action_delay_ms: post,
                total_ms: post + dead_ms,
                shutter_fallback: fallback,
            }
        }
    };

    debug!(
        camera = descriptor.id,
        exposure_ms = plan.exposure_ms,
        drift_ms = plan.drift_settle_ms,
        shutter = ?plan.shutter,
        post_delay_ms = plan.post_action_delay_ms,
        fallback = plan.shutter_fallback,
        "resolved timing"
    );
    Ok(plan)
}

fn select_shutter(mode: ShutterMode, kind: ShutterKind) -> (ShutterSelection, bool) {
    match (kind, mode) {
        (ShutterKind::BeamBlankOnly, ShutterMode::BeamBlank) => (ShutterSelection::BeamBlank, false),
        (ShutterKind::BeamBlankOnly, _) => (ShutterSelection::BeamBlank, true),
        (_, ShutterMode::FilmShutter) => (ShutterSelection::Film, false),
        (_, ShutterMode::BeamBlank) => (ShutterSelection::BeamBlank, false),
        (_, ShutterMode::DualShutter) => (ShutterSelection::Dual, false),
    }
}
