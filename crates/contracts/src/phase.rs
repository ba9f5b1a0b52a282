//! Capture session phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the single active capture session
///
/// Transitions are strictly forward within one session:
/// `Idle → RaisingScreen? → Inserting? → Settling? → EnsuringDark? → Acquiring
/// → RunningPostActions → Idle/Halted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    RaisingScreen,
    Inserting,
    Settling,
    EnsuringDark,
    Acquiring,
    RunningPostActions,
    Halted,
}

impl Phase {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::RaisingScreen => "raising_screen",
            Phase::Inserting => "inserting",
            Phase::Settling => "settling",
            Phase::EnsuringDark => "ensuring_dark",
            Phase::Acquiring => "acquiring",
            Phase::RunningPostActions => "running_post_actions",
            Phase::Halted => "halted",
        }
    }

    /// Whether a session is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Halted)
    }

    /// Ordinal used to check forward-only transitions
    pub fn ordinal(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::RaisingScreen => 1,
            Phase::Inserting => 2,
            Phase::Settling => 3,
            Phase::EnsuringDark => 4,
            Phase::Acquiring => 5,
            Phase::RunningPostActions => 6,
            Phase::Halted => 7,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
