//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{AcquisitionProfile, CameraDescriptor, CaptureRequest};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Profile info for JSON output
#[derive(Serialize)]
struct ProfileInfo {
    version: String,
    cameras: Vec<CameraInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    control_sets: Vec<ControlSetInfo>,
    retry_limit: u32,
    cache_bound_bytes: usize,
}

#[derive(Serialize)]
struct CameraInfo {
    id: u32,
    name: String,
    family: String,
    sensor: (u32, u32),
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<CameraDetail>,
}

#[derive(Serialize)]
struct CameraDetail {
    binnings: Vec<u32>,
    restriction: String,
    shutter: String,
    retractable: bool,
    is_stem: bool,
    processes_internally: bool,
}

#[derive(Serialize)]
struct ControlSetInfo {
    name: String,
    kind: String,
    camera: u32,
    exposure_s: f64,
    processing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<ResolvedInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ResolvedInfo {
    roi: (u32, u32, u32, u32),
    binning: u32,
    image: (u32, u32),
    exposure_ms: f64,
    total_ms: f64,
    shutter: String,
    shutter_fallback: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(profile = %args.profile.display(), "Loading profile info");

    if !args.profile.exists() {
        anyhow::bail!("Profile not found: {}", args.profile.display());
    }

    let profile = config_loader::ConfigLoader::load_from_path(&args.profile)
        .with_context(|| format!("Failed to load profile from {}", args.profile.display()))?;

    let info = build_profile_info(&profile, args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize profile info")?;
        println!("{}", json);
    } else {
        print_profile_info(&info);
    }

    Ok(())
}

fn build_profile_info(profile: &AcquisitionProfile, args: &InfoArgs) -> ProfileInfo {
    let cameras = profile
        .cameras
        .iter()
        .map(|c| camera_info(c, args.cameras))
        .collect();

    let control_sets = if args.control_sets {
        profile
            .control_sets
            .iter()
            .map(|r| control_set_info(r, profile.camera(r.camera)))
            .collect()
    } else {
        Vec::new()
    };

    ProfileInfo {
        version: format!("{:?}", profile.version),
        cameras,
        control_sets,
        retry_limit: profile.acquisition.retry_limit,
        cache_bound_bytes: profile.acquisition.cache.max_resident_bytes,
    }
}

fn camera_info(camera: &CameraDescriptor, detailed: bool) -> CameraInfo {
    let detail = detailed.then(|| CameraDetail {
        binnings: camera.binnings.clone(),
        restriction: format!("{:?}", camera.restriction),
        shutter: format!("{:?}", camera.capabilities.shutter),
        retractable: camera.capabilities.retractable,
        is_stem: camera.capabilities.is_stem,
        processes_internally: camera.capabilities.processes_internally,
    });
    CameraInfo {
        id: camera.id,
        name: camera.name.clone(),
        family: camera.family.as_str().to_string(),
        sensor: (camera.sensor_width, camera.sensor_height),
        detail,
    }
}

/// Describe a control set, resolving it against its camera
fn control_set_info(request: &CaptureRequest, camera: Option<&CameraDescriptor>) -> ControlSetInfo {
    let resolved = camera.map(|c| normalizer::normalize(request, c));
    let (resolved, error) = match resolved {
        Some(Ok((geometry, timing))) => {
            let roi = geometry.roi;
            (
                Some(ResolvedInfo {
                    roi: (roi.left, roi.top, roi.right, roi.bottom),
                    binning: geometry.binning,
                    image: geometry.image_size(),
                    exposure_ms: timing.exposure_ms,
                    total_ms: timing.total_ms,
                    shutter: format!("{:?}", timing.shutter),
                    shutter_fallback: timing.shutter_fallback,
                }),
                None,
            )
        }
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, Some(format!("camera {} not described", request.camera))),
    };
    ControlSetInfo {
        name: request.name.clone(),
        kind: request.kind.as_str().to_string(),
        camera: request.camera,
        exposure_s: request.exposure_s,
        processing: format!("{:?}", request.processing),
        resolved,
        error,
    }
}

fn print_profile_info(info: &ProfileInfo) {
    println!("\n=== Acquisition Profile ===\n");
    println!("Version: {}", info.version);
    println!("Retry limit: {}", info.retry_limit);
    println!("Cache bound: {} bytes", info.cache_bound_bytes);

    println!("\nCameras ({}):", info.cameras.len());
    for camera in &info.cameras {
        println!(
            "  - {} '{}' ({}) {}x{}",
            camera.id, camera.name, camera.family, camera.sensor.0, camera.sensor.1
        );
        if let Some(ref detail) = camera.detail {
            println!("      binnings: {:?}", detail.binnings);
            println!("      restriction: {}", detail.restriction);
            println!("      shutter: {}", detail.shutter);
            println!(
                "      retractable: {}, stem: {}, internal processing: {}",
                detail.retractable, detail.is_stem, detail.processes_internally
            );
        }
    }

    if !info.control_sets.is_empty() {
        println!("\nControl sets ({}):", info.control_sets.len());
        for set in &info.control_sets {
            println!(
                "  - {} [{}] camera {}, {:.3}s, {}",
                set.name, set.kind, set.camera, set.exposure_s, set.processing
            );
            if let Some(ref r) = set.resolved {
                println!(
                    "      roi {:?} binning {} -> {}x{}, exposure {:.1}ms, total {:.1}ms, {}{}",
                    r.roi,
                    r.binning,
                    r.image.0,
                    r.image.1,
                    r.exposure_ms,
                    r.total_ms,
                    r.shutter,
                    if r.shutter_fallback { " (fallback)" } else { "" }
                );
            }
            if let Some(ref error) = set.error {
                println!("      error: {}", error);
            }
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::descriptor_for;
    use contracts::{AcquisitionConfig, BackendFamily, ConfigVersion};

    #[test]
    fn test_control_set_resolved() {
        let profile = AcquisitionProfile {
            version: ConfigVersion::V1,
            cameras: vec![descriptor_for(BackendFamily::DirectElectron, 3, "de")],
            acquisition: AcquisitionConfig::default(),
            control_sets: vec![CaptureRequest::new("record", 3, 0.5)],
        };
        let info = build_profile_info(
            &profile,
            &InfoArgs {
                profile: "unused.toml".into(),
                json: true,
                cameras: true,
                control_sets: true,
            },
        );
        assert!(info.cameras[0].detail.is_some());
        let resolved = info.control_sets[0].resolved.as_ref().unwrap();
        assert_eq!(resolved.image.0 % 64, 0);
        assert!(info.control_sets[0].error.is_none());
    }
}
