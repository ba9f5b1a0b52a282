//! Worker timeout computation
//!
//! Every launch is paired with a timeout built from the exposure, the
//! backend's own margin and the configured extras.

use std::time::Duration;

use contracts::{AcquireParams, CameraDescriptor, PostAction, ScanPlan, TimeoutConfig};

/// Acquisition worker timeout
pub fn acquisition_timeout(
    params: &AcquireParams,
    descriptor: &CameraDescriptor,
    config: &TimeoutConfig,
    post_actions: &[PostAction],
) -> Duration {
    let timing = &descriptor.timing;
    let mut ms = params.timing.total_ms.max(0.0)
        + timing.dead_time_ms.max(0.0)
        + timing.timeout_margin_ms as f64
        + config.base_margin_ms as f64;

    if params.save_frames {
        let frames = params.frames.max(1) as f64;
        ms += frames * (config.per_saved_frame_ms as f64 + timing.per_frame_readout_ms.max(0.0));
    }
    if params.align_frames {
        ms += config.alignment_ms as f64;
    }
    ms += post_action_ms(post_actions, config);
    Duration::from_millis(ms.ceil() as u64)
}

/// Reference-ensure worker timeout for `shots` acquisitions
pub fn reference_timeout(
    exposure_s: f64,
    shots: u32,
    descriptor: &CameraDescriptor,
    config: &TimeoutConfig,
) -> Duration {
    let per_shot = exposure_s.max(0.0) * 1000.0
        + descriptor.timing.startup_delay_ms.max(0.0)
        + descriptor.timing.dead_time_ms.max(0.0);
    let ms = per_shot * shots.max(1) as f64
        + descriptor.timing.timeout_margin_ms as f64
        + config.base_margin_ms as f64;
    Duration::from_millis(ms.ceil() as u64)
}

/// Blanker worker timeout: last scheduled step plus margin
pub fn blanker_timeout(
    params: &AcquireParams,
    scan: Option<&ScanPlan>,
    post_actions: &[PostAction],
    config: &TimeoutConfig,
) -> Duration {
    let timing = &params.timing;
    let mut last = timing.post_action_delay_ms.max(timing.total_ms);
    if let Some(reblank) = timing.reblank_at_ms {
        last = last.max(reblank);
    }
    if let Some(scan) = scan {
        last = last.max(scan.end_ms() as f64);
    }
    let ms = last + post_action_ms(post_actions, config) + config.blanker_margin_ms as f64;
    Duration::from_millis(ms.ceil() as u64)
}

fn post_action_ms(actions: &[PostAction], config: &TimeoutConfig) -> f64 {
    actions
        .iter()
        .map(|a| (a.estimated_duration_ms() + config.per_post_action_ms) as f64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        BackendFamily, Capabilities, ProcessingMode, ResolvedGeometry, Roi, SensorTransform,
        ShutterSelection, SizeRestriction, TimingConstants, TimingPlan,
    };

    fn descriptor() -> CameraDescriptor {
        CameraDescriptor {
            id: 1,
            name: "cam".into(),
            family: BackendFamily::Simulated,
            sensor_width: 64,
            sensor_height: 64,
            binnings: vec![1],
            restriction: SizeRestriction::None,
            transform: SensorTransform::default(),
            timing: TimingConstants {
                dead_time_ms: 10.0,
                timeout_margin_ms: 100,
                ..TimingConstants::default()
            },
            capabilities: Capabilities::default(),
        }
    }

    fn params(save: bool) -> AcquireParams {
        AcquireParams {
            camera: 1,
            geometry: ResolvedGeometry {
                roi: Roi::full(64, 64),
                binning: 1,
            },
            timing: TimingPlan {
                exposure_ms: 500.0,
                requested_exposure_ms: 500.0,
                drift_settle_ms: 0.0,
                startup_delay_ms: 0.0,
                shutter: ShutterSelection::BeamBlank,
                pre_exposure: Vec::new(),
                reblank_at_ms: None,
                post_action_delay_ms: 500.0,
                total_ms: 500.0,
                shutter_fallback: false,
            },
            processing: ProcessingMode::Unprocessed,
            frames: 10,
            save_frames: save,
            align_frames: false,
            stem_channels: Vec::new(),
        }
    }

    #[test]
    fn test_acquisition_timeout_extras() {
        let config = TimeoutConfig {
            base_margin_ms: 1000,
            per_saved_frame_ms: 20,
            ..TimeoutConfig::default()
        };
        let plain = acquisition_timeout(&params(false), &descriptor(), &config, &[]);
        assert_eq!(plain, Duration::from_millis(500 + 10 + 100 + 1000));

        let saving = acquisition_timeout(&params(true), &descriptor(), &config, &[]);
        assert_eq!(saving - plain, Duration::from_millis(200));

        let with_action = acquisition_timeout(
            &params(false),
            &descriptor(),
            &config,
            &[PostAction::MagChange { index: 2 }],
        );
        assert_eq!(
            with_action - plain,
            Duration::from_millis(200 + config.per_post_action_ms)
        );
    }

    #[test]
    fn test_reference_timeout_scales_with_shots() {
        let config = TimeoutConfig::default();
        let one = reference_timeout(1.0, 1, &descriptor(), &config);
        let three = reference_timeout(1.0, 3, &descriptor(), &config);
        assert_eq!(three - one, Duration::from_millis(2 * 1010));
    }
}
