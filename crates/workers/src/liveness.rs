//! Acquisition / blanker liveness handshake
//!
//! The acquisition worker holds the guard for the duration of its hardware
//! call. The blanker watches it: a guard dropped without
//! [`LivenessGuard::complete`] marks the acquisition as failed, and the
//! blanker stops its schedule and reblanks.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, WorkerError};
use crate::exchange::lock;

#[derive(Debug, Default)]
struct LivenessState {
    holder: Option<u64>,
    failed: bool,
}

/// Coarse mutex shared by the acquisition and blanker workers
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    inner: Arc<(Mutex<LivenessState>, Condvar)>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the handshake for `session`, waiting up to `wait` for a previous
    /// holder to release it
    pub fn acquire(&self, session: u64, wait: Duration) -> Result<LivenessGuard> {
        let (mutex, condvar) = &*self.inner;
        let deadline = Instant::now() + wait;
        let mut state = lock(mutex);
        while let Some(holder) = state.holder {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(WorkerError::LivenessHeld { holder });
            }
            state = condvar
                .wait_timeout(state, left)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        state.holder = Some(session);
        state.failed = false;
        debug!(session, "liveness acquired");
        Ok(LivenessGuard {
            liveness: self.clone(),
            session,
            completed: false,
        })
    }

    pub fn holder(&self) -> Option<u64> {
        lock(&self.inner.0).holder
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Whether the last holder released without completing
    pub fn failed(&self) -> bool {
        lock(&self.inner.0).failed
    }

    /// Release regardless of holder, after a worker was abandoned
    pub fn force_release(&self) {
        let (mutex, condvar) = &*self.inner;
        let mut state = lock(mutex);
        if let Some(holder) = state.holder.take() {
            warn!(holder, "liveness force-released");
        }
        condvar.notify_all();
    }

    fn release(&self, session: u64, completed: bool) {
        let (mutex, condvar) = &*self.inner;
        let mut state = lock(mutex);
        if state.holder == Some(session) {
            state.holder = None;
            state.failed = !completed;
            condvar.notify_all();
        }
    }
}

/// Held by the acquisition worker while the hardware call runs
#[derive(Debug)]
pub struct LivenessGuard {
    liveness: Liveness,
    session: u64,
    completed: bool,
}

impl LivenessGuard {
    /// Release as a successful acquisition
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.liveness.release(self.session, self.completed);
    }
}
