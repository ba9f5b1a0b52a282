//! Resolved shutter / blanking timing.

use serde::{Deserialize, Serialize};

/// Shutter actually used for a shot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterSelection {
    Film,
    BeamBlank,
    Dual,
    /// No hardware shutter, the blanker worker blanks and unblanks
    Software,
}

/// Beam blanker event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankerEvent {
    Blank,
    Unblank,
}

/// One timed blanker event, relative to the start of the acquisition call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlankerStep {
    pub at_ms: f64,
    pub event: BlankerEvent,
}

/// Timing plan for one acquisition
///
/// All delays are milliseconds and never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPlan {
    /// Exposure the backend is asked for, after any inflation
    pub exposure_ms: f64,
    /// Exposure the request asked for
    pub requested_exposure_ms: f64,
    /// Drift settle after the built-in settling is deducted
    pub drift_settle_ms: f64,
    pub startup_delay_ms: f64,
    pub shutter: ShutterSelection,
    /// Blank/unblank schedule before and during the exposure
    pub pre_exposure: Vec<BlankerStep>,
    /// Final reblank time, when the core owns the blanker
    pub reblank_at_ms: Option<f64>,
    /// When queued post-exposure actions may start
    pub post_action_delay_ms: f64,
    /// Expected duration of the whole shot, readout excluded
    pub total_ms: f64,
    /// The requested shutter mode was unavailable and substituted
    pub shutter_fallback: bool,
}

impl TimingPlan {
    /// Smallest delay in the plan
    pub fn min_delay_ms(&self) -> f64 {
        let mut min = self
            .exposure_ms
            .min(self.drift_settle_ms)
            .min(self.startup_delay_ms)
            .min(self.post_action_delay_ms)
            .min(self.total_ms);
        for step in &self.pre_exposure {
            min = min.min(step.at_ms);
        }
        if let Some(reblank) = self.reblank_at_ms {
            min = min.min(reblank);
        }
        min
    }

    /// Whether the blanker worker must drive the beam blanker
    pub fn needs_blanker(&self) -> bool {
        !self.pre_exposure.is_empty() || self.reblank_at_ms.is_some()
    }
}
