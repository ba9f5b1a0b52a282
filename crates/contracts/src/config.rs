//! Acquisition core configuration contracts.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level acquisition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Replays of the same request after a retryable failure
    #[validate(range(max = 10))]
    pub retry_limit: u32,

    /// Idle-poll period of the host scheduler
    #[validate(range(min = 1, max = 1000))]
    pub scheduler_tick_ms: u64,

    /// Maximum wait for the viewing screen to go up
    #[validate(range(min = 1))]
    pub screen_timeout_ms: u64,

    /// Maximum wait for insertion / retraction to complete
    #[validate(range(min = 1))]
    pub insertion_timeout_ms: u64,

    /// Grace period between a cooperative stop request and abandoning a thread
    pub stop_grace_ms: u64,

    #[validate(nested)]
    pub cache: CacheConfig,

    #[validate(nested)]
    pub dark_quality: DarkQualityConfig,

    #[validate(nested)]
    pub timeouts: TimeoutConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            scheduler_tick_ms: 10,
            screen_timeout_ms: 10_000,
            insertion_timeout_ms: 30_000,
            stop_grace_ms: 500,
            cache: CacheConfig::default(),
            dark_quality: DarkQualityConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Reference cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on resident reference bytes
    #[validate(range(min = 1))]
    pub max_resident_bytes: usize,

    /// Dark references kept per (camera, control-set kind)
    #[validate(range(min = 1))]
    pub max_darks_per_group: usize,

    /// Dark references older than this are refreshed
    #[validate(range(min = 0.0))]
    pub dark_max_age_s: f64,

    /// Gain references older than this are refreshed
    #[validate(range(min = 0.0))]
    pub gain_max_age_s: f64,

    /// Exposure difference still counted as an exact match
    #[validate(range(min = 0.0))]
    pub exposure_tolerance_s: f64,

    /// Shutter delay difference still counted as an exact match
    #[validate(range(min = 0.0))]
    pub delay_tolerance_ms: f64,

    /// Dark interpolation, disabled when absent
    pub interpolation: Option<DarkInterpolationConfig>,

    #[validate(nested)]
    pub gain_compaction: GainCompactionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_resident_bytes: 512 * 1024 * 1024,
            max_darks_per_group: 4,
            dark_max_age_s: 3600.0,
            gain_max_age_s: 7.0 * 24.0 * 3600.0,
            exposure_tolerance_s: 0.0005,
            delay_tolerance_ms: 0.5,
            interpolation: None,
            gain_compaction: GainCompactionConfig::default(),
        }
    }
}

/// Dark reference interpolation grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkInterpolationConfig {
    /// Spacing of the bracketing exposure grid
    pub interval_s: f64,
    /// Bracketing entries below this exposure are not used
    pub min_exposure_s: f64,
    /// Tunable correction factor applied to the lower reference
    #[serde(default = "default_lower_ratio_correction")]
    pub lower_ratio_correction: f64,
}

fn default_lower_ratio_correction() -> f64 {
    1.0
}

impl Default for DarkInterpolationConfig {
    fn default() -> Self {
        Self {
            interval_s: 1.0,
            min_exposure_s: 0.1,
            lower_ratio_correction: default_lower_ratio_correction(),
        }
    }
}

/// Lossy gain reference compaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GainCompactionConfig {
    pub enabled: bool,
    /// Compact once resident bytes exceed this fraction of the bound
    #[validate(range(min = 0.0, max = 1.0))]
    pub pressure_fraction: f64,
}

impl Default for GainCompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pressure_fraction: 0.75,
        }
    }
}

/// Dark reference quality check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DarkQualityConfig {
    /// Sampled mean above this rejects the dark
    pub max_mean: f64,
    /// Sampled SD above this rejects the dark
    pub max_sd: f64,
    /// Re-acquisitions after a rejected dark
    #[validate(range(max = 10))]
    pub bad_dark_retries: u32,
    /// Repeats averaged into one dark
    #[validate(range(min = 1, max = 64))]
    pub average_count: u32,
    /// Sample every n-th pixel for the check
    #[validate(range(min = 1))]
    pub sample_stride: usize,
}

impl Default for DarkQualityConfig {
    fn default() -> Self {
        Self {
            max_mean: 2000.0,
            max_sd: 500.0,
            bad_dark_retries: 1,
            average_count: 1,
            sample_stride: 16,
        }
    }
}

/// Worker timeout margins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Added to every acquisition and reference timeout
    pub base_margin_ms: u64,
    /// Added per saved sub-frame
    pub per_saved_frame_ms: u64,
    /// Added when frames are aligned
    pub alignment_ms: u64,
    /// Added per queued post-exposure action
    pub per_post_action_ms: u64,
    /// Extra time the blanker gets beyond its last scheduled step
    pub blanker_margin_ms: u64,
    /// Maximum wait for a pre-exposure script
    #[validate(range(min = 1))]
    pub script_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_margin_ms: 5_000,
            per_saved_frame_ms: 20,
            alignment_ms: 10_000,
            per_post_action_ms: 1_000,
            blanker_margin_ms: 2_000,
            script_timeout_ms: 30_000,
        }
    }
}
