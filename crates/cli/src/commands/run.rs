//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Session, SessionConfig};

/// Execute the `run` command
pub async fn run_capture(args: &RunArgs) -> Result<()> {
    info!(profile = %args.profile.display(), "Loading profile");

    if !args.profile.exists() {
        return Err(CliError::profile_not_found(args.profile.display().to_string()).into());
    }

    let profile = config_loader::ConfigLoader::load_from_path(&args.profile)
        .with_context(|| format!("Failed to load profile from {}", args.profile.display()))?;

    let request = profile
        .control_set(&args.control_set)
        .ok_or_else(|| CliError::unknown_control_set(&args.control_set))?;

    info!(
        cameras = profile.cameras.len(),
        control_sets = profile.control_sets.len(),
        camera = request.camera,
        exposure_s = request.exposure_s,
        "Profile loaded"
    );

    if args.dry_run {
        info!("Dry run mode - profile and control set are valid, exiting");
        println!(
            "Control set '{}' on camera {}: {:.3}s exposure, binning {}, {:?}",
            request.name, request.camera, request.exposure_s, request.binning, request.processing
        );
        return Ok(());
    }

    let session = Session::new(SessionConfig {
        profile,
        control_set: args.control_set.clone(),
        frames: args.frames.max(1),
        timeout: Duration::from_secs(args.timeout.max(1)),
        time_scale: args.time_scale,
    });

    let interrupted = session.interrupt_flag();
    let watcher = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, halting session");
                interrupted.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let result = session.run().await;
    watcher.abort();
    let stats = result.context("Capture session failed")?;

    stats.print_summary();
    if let Some(failure) = stats.failure {
        return Err(CliError::Capture(failure).into());
    }

    info!(
        frames = stats.frames,
        duration_secs = stats.duration.as_secs_f64(),
        "Capture session completed"
    );
    Ok(())
}
