//! Orchestrator-owned session state.

use std::time::Instant;

use contracts::{
    AlignmentStats, CameraDescriptor, CameraId, CaptureRequest, ImageBuffer, Phase, PostAction,
    ReferenceKind, ResolvedGeometry, TimingPlan,
};
use normalizer::StemScanTiming;
use reference_cache::{CacheLookup, EntryId};
use workers::BlankerReport;

use crate::continuous::ContinuousState;

/// One finished image
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub request_name: String,
    pub camera: CameraId,
    pub image: ImageBuffer,
    pub geometry: ResolvedGeometry,
    pub timing: TimingPlan,
    pub frames_saved: u32,
    pub alignment: Option<AlignmentStats>,
    pub stem: Option<StemScanTiming>,
    pub blanker: Option<BlankerReport>,
    /// When the hardware call for this frame started
    pub started_at: Instant,
    /// Frame number within the session, from 1
    pub frame_index: u64,
    pub retries: u32,
}

/// Cache entries a session uses for processing
#[derive(Debug, Clone, Default)]
pub struct ReferencePlan {
    pub dark: Option<CacheLookup>,
    pub gain: Option<EntryId>,
    /// Entries awaiting acquisition in this session
    pub pending: Vec<(EntryId, ReferenceKind)>,
}

impl ReferencePlan {
    /// Every cache id processing will read
    pub fn resolved_ids(&self) -> Vec<EntryId> {
        let mut ids = match self.dark {
            Some(CacheLookup::Exact { id, .. }) => vec![id],
            Some(CacheLookup::Bracketed { lower, upper }) => vec![lower.id, upper.id],
            None => Vec::new(),
        };
        ids.extend(self.gain);
        ids
    }
}

/// Session counters kept across sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub cleanups: u64,
    pub replayed: u64,
}

/// State of the (single) capture session
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: Phase,
    pub phase_started: Option<Instant>,
    /// Private copy of the request being captured
    pub request: Option<CaptureRequest>,
    pub descriptor: Option<CameraDescriptor>,
    pub geometry: Option<ResolvedGeometry>,
    pub timing: Option<TimingPlan>,
    pub stem: Option<StemScanTiming>,
    pub references: ReferencePlan,
    pub script_done: bool,
    /// Acquired frame waiting for the blanker to finish
    pub frame: Option<CapturedImage>,
    pub retries: u32,
    pub started: Option<Instant>,
    pub frame_index: u64,
    pub halt_requested: bool,
    /// Request received while busy, replayed when the session ends
    pub pending: Option<CaptureRequest>,
    /// One-shot actions for the next acquisition
    pub queued_actions: Vec<PostAction>,
    /// Image shift / stage settling not yet elapsed
    pub settle_until: Option<Instant>,
    pub continuous: ContinuousState,
    pub counters: SessionCounters,
    /// Time spent in each phase of the current session
    pub phase_times: Vec<(Phase, f64)>,
}

impl SessionState {
    /// A session owns the hardware from `begin` until it is cleared
    pub fn is_active(&self) -> bool {
        self.request.is_some()
    }

    /// Move to `phase`, returning how long the previous phase lasted
    pub fn enter(&mut self, phase: Phase) -> Option<(Phase, f64)> {
        let now = Instant::now();
        let previous = self.phase_started.map(|started| {
            let ms = now.duration_since(started).as_secs_f64() * 1000.0;
            (self.phase, ms)
        });
        if let Some(entry) = previous {
            if entry.0.is_busy() {
                self.phase_times.push(entry);
            }
        }
        self.phase = phase;
        self.phase_started = Some(now);
        previous
    }

    /// Start a session for `request`
    pub fn begin(&mut self, request: CaptureRequest) {
        self.clear_session();
        self.continuous.reset(request.is_continuous());
        self.request = Some(request);
        self.started = Some(Instant::now());
        self.counters.started += 1;
    }

    /// Drop the per-session fields; queued actions, settling and the
    /// pending request survive
    pub fn clear_session(&mut self) {
        self.request = None;
        self.descriptor = None;
        self.geometry = None;
        self.timing = None;
        self.stem = None;
        self.references = ReferencePlan::default();
        self.script_done = false;
        self.frame = None;
        self.retries = 0;
        self.started = None;
        self.frame_index = 0;
        self.halt_requested = false;
        self.phase_times.clear();
        self.continuous.repeat = false;
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_records_busy_phases_only() {
        let mut state = SessionState::default();
        state.enter(Phase::Idle);
        state.enter(Phase::Acquiring);
        state.enter(Phase::Idle);
        assert_eq!(state.phase_times.len(), 1);
        assert_eq!(state.phase_times[0].0, Phase::Acquiring);
    }

    #[test]
    fn test_resolved_ids_cover_bracket_and_gain() {
        use reference_cache::BracketSlot;

        let slot = |id| BracketSlot {
            id,
            exposure_s: id as f64,
            needs_refresh: false,
        };
        let plan = ReferencePlan {
            dark: Some(CacheLookup::Bracketed {
                lower: slot(3),
                upper: slot(4),
            }),
            gain: Some(7),
            pending: Vec::new(),
        };
        assert_eq!(plan.resolved_ids(), vec![3, 4, 7]);
        assert!(ReferencePlan::default().resolved_ids().is_empty());
    }

    #[test]
    fn test_clear_keeps_queued_actions() {
        let mut state = SessionState::default();
        state.queued_actions.push(PostAction::Defocus { delta_um: 1.0 });
        state.begin(CaptureRequest::new("record", 1, 0.1));
        state.clear_session();
        assert!(state.request.is_none());
        assert_eq!(state.queued_actions.len(), 1);
        assert_eq!(state.counters.started, 1);
    }
}
