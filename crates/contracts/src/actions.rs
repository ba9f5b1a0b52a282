//! Post-exposure actions and mid-exposure scans performed by the blanker.

use serde::{Deserialize, Serialize};

/// One-shot action queued for after the exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostAction {
    StageMove {
        x_um: f64,
        y_um: f64,
        z_um: f64,
        settle_ms: u64,
    },
    ImageShift {
        x: f64,
        y: f64,
        settle_ms: u64,
    },
    BeamTilt {
        x: f64,
        y: f64,
    },
    Astigmatism {
        x: f64,
        y: f64,
    },
    Defocus {
        delta_um: f64,
    },
    MagChange {
        index: u32,
    },
    /// Step focus by `steps` deltas spaced `interval_ms` apart
    FocusSteps {
        steps: Vec<f64>,
        interval_ms: u64,
    },
}

impl PostAction {
    /// Settling the next capture has to wait for after this action
    pub fn settle_ms(&self) -> u64 {
        match self {
            PostAction::StageMove { settle_ms, .. } | PostAction::ImageShift { settle_ms, .. } => {
                *settle_ms
            }
            _ => 0,
        }
    }

    /// Time the blanker needs to perform the action
    pub fn estimated_duration_ms(&self) -> u64 {
        match self {
            PostAction::StageMove { .. } => 1000,
            PostAction::MagChange { .. } => 200,
            PostAction::FocusSteps { steps, interval_ms } => steps.len() as u64 * interval_ms,
            _ => 50,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PostAction::StageMove { .. } => "stage_move",
            PostAction::ImageShift { .. } => "image_shift",
            PostAction::BeamTilt { .. } => "beam_tilt",
            PostAction::Astigmatism { .. } => "astigmatism",
            PostAction::Defocus { .. } => "defocus",
            PostAction::MagChange { .. } => "mag_change",
            PostAction::FocusSteps { .. } => "focus_steps",
        }
    }
}

/// Axis swept during an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAxis {
    StageTilt,
    BeamTiltX,
    BeamTiltY,
    Focus,
}

/// Linear mid-exposure sweep sampled on a fixed tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub axis: ScanAxis,
    pub start: f64,
    pub end: f64,
    /// Offset from the start of the acquisition call
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    10
}

impl ScanPlan {
    /// Scan value at `elapsed_ms` into the sweep, clamped to the end
    pub fn value_at(&self, elapsed_ms: f64) -> f64 {
        if self.duration_ms == 0 {
            return self.end;
        }
        let frac = (elapsed_ms / self.duration_ms as f64).clamp(0.0, 1.0);
        self.start + (self.end - self.start) * frac
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_only_for_moves() {
        let shift = PostAction::ImageShift {
            x: 1.0,
            y: 0.0,
            settle_ms: 300,
        };
        assert_eq!(shift.settle_ms(), 300);
        assert_eq!(PostAction::Defocus { delta_um: -2.0 }.settle_ms(), 0);
    }

    #[test]
    fn test_scan_value_clamped() {
        let plan = ScanPlan {
            axis: ScanAxis::StageTilt,
            start: -10.0,
            end: 10.0,
            start_ms: 0,
            duration_ms: 100,
            tick_ms: 10,
        };
        assert_eq!(plan.value_at(0.0), -10.0);
        assert_eq!(plan.value_at(50.0), 0.0);
        assert_eq!(plan.value_at(500.0), 10.0);
    }
}
