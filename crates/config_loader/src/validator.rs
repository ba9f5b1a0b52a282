//! Profile validation
//!
//! Rules:
//! - camera ids unique
//! - binning tables non-empty, ascending, no zero entries
//! - sensor size non-zero, alignment moduli / blocks non-zero
//! - subarea tiers fit the sensor
//! - control sets reference known cameras, names unique
//! - exposures and settle times non-negative
//! - `validator` range rules on the core configuration
//! - dark interpolation grid sane when enabled

use std::collections::HashSet;

use contracts::{
    AcquisitionConfig, AcquisitionProfile, CameraDescriptor, ConfigError, SizeRestriction,
};
use validator::Validate;

/// Validate an acquisition profile
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(profile: &AcquisitionProfile) -> Result<(), ConfigError> {
    validate_camera_ids(profile)?;
    for camera in &profile.cameras {
        validate_camera(camera)?;
    }
    validate_control_sets(profile)?;
    validate_acquisition(&profile.acquisition)?;
    Ok(())
}

fn validate_camera_ids(profile: &AcquisitionProfile) -> Result<(), ConfigError> {
    if profile.cameras.is_empty() {
        return Err(ConfigError::config_validation(
            "cameras",
            "at least one camera is required",
        ));
    }
    let mut seen = HashSet::new();
    for camera in &profile.cameras {
        if !seen.insert(camera.id) {
            return Err(ConfigError::config_validation(
                format!("cameras[id={}]", camera.id),
                "duplicate camera id",
            ));
        }
    }
    Ok(())
}

fn validate_camera(camera: &CameraDescriptor) -> Result<(), ConfigError> {
    let field = |name: &str| format!("cameras[{}].{}", camera.id, name);

    if camera.sensor_width == 0 || camera.sensor_height == 0 {
        return Err(ConfigError::config_validation(
            field("sensor_width"),
            "sensor size must be non-zero",
        ));
    }

    if camera.binnings.is_empty() {
        return Err(ConfigError::config_validation(
            field("binnings"),
            "binning table cannot be empty",
        ));
    }
    if camera.binnings.contains(&0) {
        return Err(ConfigError::config_validation(
            field("binnings"),
            "binning 0 is not allowed",
        ));
    }
    if camera.binnings.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::config_validation(
            field("binnings"),
            format!(
                "binning table must be strictly ascending, got {:?}",
                camera.binnings
            ),
        ));
    }

    match &camera.restriction {
        SizeRestriction::None => {}
        SizeRestriction::Modulo {
            size_x,
            size_y,
            offset_x,
            offset_y,
        } => {
            if *size_x == 0 || *size_y == 0 || *offset_x == 0 || *offset_y == 0 {
                return Err(ConfigError::config_validation(
                    field("restriction"),
                    "modulo alignment values must be non-zero",
                ));
            }
        }
        SizeRestriction::Block { block } => {
            if *block == 0 {
                return Err(ConfigError::config_validation(
                    field("restriction.block"),
                    "block size must be non-zero",
                ));
            }
        }
        SizeRestriction::Subareas { sizes } => {
            if sizes.is_empty() {
                return Err(ConfigError::config_validation(
                    field("restriction.sizes"),
                    "at least one subarea size is required",
                ));
            }
            for (idx, tier) in sizes.iter().enumerate() {
                if tier.width == 0
                    || tier.height == 0
                    || tier.width > camera.sensor_width
                    || tier.height > camera.sensor_height
                {
                    return Err(ConfigError::config_validation(
                        field(&format!("restriction.sizes[{idx}]")),
                        format!(
                            "subarea {}x{} does not fit the {}x{} sensor",
                            tier.width, tier.height, camera.sensor_width, camera.sensor_height
                        ),
                    ));
                }
            }
        }
    }

    let timing = &camera.timing;
    let times = [
        ("timing.startup_delay_ms", timing.startup_delay_ms),
        ("timing.built_in_settling_s", timing.built_in_settling_s),
        ("timing.min_drift_s", timing.min_drift_s),
        ("timing.extra_beam_time_s", timing.extra_beam_time_s),
        ("timing.dead_time_ms", timing.dead_time_ms),
        ("timing.default_flyback_us", timing.default_flyback_us),
        ("timing.per_frame_readout_ms", timing.per_frame_readout_ms),
    ];
    for (name, value) in times {
        if !(value >= 0.0) {
            return Err(ConfigError::config_validation(
                field(name),
                format!("must be >= 0, got {value}"),
            ));
        }
    }

    Ok(())
}

fn validate_control_sets(profile: &AcquisitionProfile) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for request in &profile.control_sets {
        let field = |name: &str| format!("control_sets[{}].{}", request.name, name);

        if request.name.is_empty() {
            return Err(ConfigError::config_validation(
                "control_sets.name",
                "control set name cannot be empty",
            ));
        }
        if !names.insert(request.name.as_str()) {
            return Err(ConfigError::config_validation(
                field("name"),
                "duplicate control set name",
            ));
        }
        if profile.camera(request.camera).is_none() {
            return Err(ConfigError::config_validation(
                field("camera"),
                format!("unknown camera {}", request.camera),
            ));
        }
        if !(request.exposure_s >= 0.0) {
            return Err(ConfigError::config_validation(
                field("exposure_s"),
                format!("exposure must be >= 0, got {}", request.exposure_s),
            ));
        }
        if !(request.drift_settle_s >= 0.0) {
            return Err(ConfigError::config_validation(
                field("drift_settle_s"),
                format!("drift settle must be >= 0, got {}", request.drift_settle_s),
            ));
        }
        if request.binning == 0 {
            return Err(ConfigError::config_validation(
                field("binning"),
                "binning must be >= 1",
            ));
        }
        if let Some(roi) = &request.roi {
            if roi.is_empty() {
                return Err(ConfigError::config_validation(
                    field("roi"),
                    "ROI must have non-zero width and height",
                ));
            }
        }
        if let Some(scan) = &request.scan {
            if scan.tick_ms == 0 {
                return Err(ConfigError::config_validation(
                    field("scan.tick_ms"),
                    "scan tick must be >= 1ms",
                ));
            }
        }
    }
    Ok(())
}

fn validate_acquisition(config: &AcquisitionConfig) -> Result<(), ConfigError> {
    config.validate().map_err(|errors| {
        ConfigError::config_validation("acquisition", errors.to_string().replace('\n', "; "))
    })?;

    if let Some(interp) = &config.cache.interpolation {
        if !(interp.interval_s > 0.0) {
            return Err(ConfigError::config_validation(
                "acquisition.cache.interpolation.interval_s",
                format!("interval must be > 0, got {}", interp.interval_s),
            ));
        }
        if !(interp.min_exposure_s >= 0.0) {
            return Err(ConfigError::config_validation(
                "acquisition.cache.interpolation.min_exposure_s",
                format!("must be >= 0, got {}", interp.min_exposure_s),
            ));
        }
        if !(interp.lower_ratio_correction > 0.0) {
            return Err(ConfigError::config_validation(
                "acquisition.cache.interpolation.lower_ratio_correction",
                "correction factor must be > 0",
            ));
        }
    }
    Ok(())
}
