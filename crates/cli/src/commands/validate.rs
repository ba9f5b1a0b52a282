//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{AcquisitionProfile, ProcessingMode};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    profile_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ProfileSummary>,
}

#[derive(Serialize)]
struct ProfileSummary {
    version: String,
    camera_count: usize,
    control_set_count: usize,
    retry_limit: u32,
    cache_bound_bytes: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(profile = %args.profile.display(), "Validating profile");

    let result = validate_profile(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Profile validation failed")
    }
}

fn validate_profile(args: &ValidateArgs) -> ValidationResult {
    let profile_path = args.profile.display().to_string();

    if !args.profile.exists() {
        return ValidationResult {
            valid: false,
            profile_path,
            error: Some(format!("File not found: {}", args.profile.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.profile) {
        Ok(profile) => {
            let warnings = collect_warnings(&profile);
            ValidationResult {
                valid: true,
                profile_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ProfileSummary {
                    version: format!("{:?}", profile.version),
                    camera_count: profile.cameras.len(),
                    control_set_count: profile.control_sets.len(),
                    retry_limit: profile.acquisition.retry_limit,
                    cache_bound_bytes: profile.acquisition.cache.max_resident_bytes,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            profile_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect non-fatal profile issues
fn collect_warnings(profile: &AcquisitionProfile) -> Vec<String> {
    let mut warnings = Vec::new();

    if profile.control_sets.is_empty() {
        warnings.push("No control sets defined - `run` has nothing to capture".to_string());
    }

    for request in &profile.control_sets {
        let Some(camera) = profile.camera(request.camera) else {
            continue;
        };
        if request.processing != ProcessingMode::Unprocessed
            && camera.capabilities.processes_internally
        {
            warnings.push(format!(
                "Control set '{}': camera {} processes internally, references are not cached",
                request.name, camera.id
            ));
        }
        if request.frames.save_frames && !camera.capabilities.can_save_frames {
            warnings.push(format!(
                "Control set '{}': camera {} cannot save frames",
                request.name, camera.id
            ));
        }
        if request.pre_script.is_some() && !camera.capabilities.supports_scripts {
            warnings.push(format!(
                "Control set '{}': camera {} does not run scripts",
                request.name, camera.id
            ));
        }
    }

    if profile.acquisition.retry_limit == 0 {
        warnings.push("acquisition.retry_limit is 0 - timeouts fail immediately".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Profile is valid: {}", result.profile_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Cameras: {}", summary.camera_count);
            println!("  Control sets: {}", summary.control_set_count);
            println!("  Retry limit: {}", summary.retry_limit);
            println!("  Cache bound: {} bytes", summary.cache_bound_bytes);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Profile is invalid: {}", result.profile_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
