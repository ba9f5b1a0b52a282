//! Simulated microscope
//!
//! Records every blanker, screen and post-action call with its time so
//! tests can check ordering and latency.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use contracts::{BackendError, PostAction, ScanAxis, ScopeControl};
use tracing::trace;

use crate::lock;

/// One recorded microscope call
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeEvent {
    Blank(bool),
    RaiseScreen,
    PostAction(PostAction),
    Scan(ScanAxis, f64),
}

/// Simulated microscope configuration
#[derive(Debug, Clone, Default)]
pub struct ScopeConfig {
    /// Screen starts lowered
    pub screen_down: bool,
    /// Time the screen takes to go up
    pub screen_raise_ms: u64,
    /// Screen never goes up
    pub screen_stuck: bool,
    /// Post-action labels that fail
    pub failing_actions: Vec<&'static str>,
}

#[derive(Debug)]
struct ScopeState {
    blanked: bool,
    screen_down: bool,
    raise_started: Option<Instant>,
    events: Vec<(Instant, ScopeEvent)>,
}

/// Simulated microscope
pub struct SimulatedScope {
    config: ScopeConfig,
    created: Instant,
    state: Mutex<ScopeState>,
}

impl SimulatedScope {
    pub fn new() -> Self {
        Self::with_config(ScopeConfig::default())
    }

    pub fn with_config(config: ScopeConfig) -> Self {
        Self {
            state: Mutex::new(ScopeState {
                blanked: true,
                screen_down: config.screen_down,
                raise_started: None,
                events: Vec::new(),
            }),
            config,
            created: Instant::now(),
        }
    }

    /// Recorded events in call order
    pub fn events(&self) -> Vec<ScopeEvent> {
        lock(&self.state).events.iter().map(|(_, e)| e.clone()).collect()
    }

    /// Recorded events with their offset from scope creation
    pub fn timed_events(&self) -> Vec<(Duration, ScopeEvent)> {
        lock(&self.state)
            .events
            .iter()
            .map(|(at, e)| (at.duration_since(self.created), e.clone()))
            .collect()
    }

    pub fn is_blanked(&self) -> bool {
        lock(&self.state).blanked
    }

    /// Applied post-actions in order
    pub fn post_actions(&self) -> Vec<PostAction> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ScopeEvent::PostAction(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Lower the screen again, e.g. between test captures
    pub fn lower_screen(&self) {
        let mut state = lock(&self.state);
        state.screen_down = true;
        state.raise_started = None;
    }

    fn record(&self, event: ScopeEvent) {
        trace!(?event, "scope call");
        lock(&self.state).events.push((Instant::now(), event));
    }
}

impl Default for SimulatedScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeControl for SimulatedScope {
    fn set_beam_blank(&self, blanked: bool) -> Result<(), BackendError> {
        lock(&self.state).blanked = blanked;
        self.record(ScopeEvent::Blank(blanked));
        Ok(())
    }

    fn beam_blanked(&self) -> Result<bool, BackendError> {
        Ok(lock(&self.state).blanked)
    }

    fn screen_down(&self) -> Result<bool, BackendError> {
        let mut state = lock(&self.state);
        if let Some(started) = state.raise_started {
            if !self.config.screen_stuck
                && started.elapsed() >= Duration::from_millis(self.config.screen_raise_ms)
            {
                state.screen_down = false;
                state.raise_started = None;
            }
        }
        Ok(state.screen_down)
    }

    fn raise_screen(&self) -> Result<(), BackendError> {
        {
            let mut state = lock(&self.state);
            if state.screen_down && state.raise_started.is_none() {
                state.raise_started = Some(Instant::now());
            }
        }
        self.record(ScopeEvent::RaiseScreen);
        Ok(())
    }

    fn apply_post_action(&self, action: &PostAction) -> Result<(), BackendError> {
        if self.config.failing_actions.contains(&action.label()) {
            return Err(BackendError::new(format!("{} failed", action.label())));
        }
        self.record(ScopeEvent::PostAction(action.clone()));
        Ok(())
    }

    fn set_scan_value(&self, axis: ScanAxis, value: f64) -> Result<(), BackendError> {
        self.record(ScopeEvent::Scan(axis, value));
        Ok(())
    }
}
