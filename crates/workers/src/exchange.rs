//! Per-session cross-thread context
//!
//! One [`ThreadExchange`] lives in each sequencer. Every worker kind owns its
//! own [`ResultSlot`]; a worker publishes through a [`SlotWriter`] stamped
//! with the slot generation at launch, so results from a worker abandoned in
//! an earlier session are discarded instead of landing in the current one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use contracts::{
    AcquisitionError, AlignmentStats, CameraId, ImageBuffer, ResolvedGeometry, TimingPlan,
};
use reference_cache::EntryId;
use tracing::debug;

use crate::blanker::BlankerReport;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
struct SlotState<T> {
    generation: u64,
    value: Option<Result<T, AcquisitionError>>,
}

/// Result cell for one worker kind
#[derive(Debug)]
pub struct ResultSlot<T> {
    name: &'static str,
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> ResultSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(SlotState {
                generation: 0,
                value: None,
            })),
        }
    }

    /// Writer bound to the current generation
    pub fn writer(&self) -> SlotWriter<T> {
        SlotWriter {
            name: self.name,
            generation: lock(&self.state).generation,
            state: self.state.clone(),
        }
    }

    pub fn is_filled(&self) -> bool {
        lock(&self.state).value.is_some()
    }

    pub fn take(&self) -> Option<Result<T, AcquisitionError>> {
        lock(&self.state).value.take()
    }

    /// Drop any result and invalidate outstanding writers
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.value = None;
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }
}

/// Write half of a [`ResultSlot`], moved into the worker thread
#[derive(Debug)]
pub struct SlotWriter<T> {
    name: &'static str,
    generation: u64,
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> SlotWriter<T> {
    /// Store the result; returns `false` if the slot was reset since launch
    pub fn publish(self, result: Result<T, AcquisitionError>) -> bool {
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            debug!(slot = self.name, generation = self.generation, "stale worker result discarded");
            return false;
        }
        state.value = Some(result);
        true
    }
}

/// Result of the acquisition worker
#[derive(Debug, Clone)]
pub struct AcquisitionOutcome {
    pub image: ImageBuffer,
    pub frames_saved: u32,
    pub alignment: Option<AlignmentStats>,
    /// When the hardware call started
    pub started_at: Instant,
    pub elapsed_ms: f64,
}

/// References produced by the reference-ensure worker
pub type ReferenceBatch = Vec<(EntryId, ImageBuffer)>;

/// Shared context of one capture session
#[derive(Debug)]
pub struct ThreadExchange {
    session: u64,
    pub camera: Option<CameraId>,
    pub geometry: Option<ResolvedGeometry>,
    pub timing: Option<TimingPlan>,
    pub insertion: ResultSlot<()>,
    pub references: ResultSlot<ReferenceBatch>,
    pub script: ResultSlot<()>,
    pub acquisition: ResultSlot<AcquisitionOutcome>,
    pub blanker: ResultSlot<BlankerReport>,
}

impl ThreadExchange {
    pub fn new() -> Self {
        Self {
            session: 0,
            camera: None,
            geometry: None,
            timing: None,
            insertion: ResultSlot::new("insertion"),
            references: ResultSlot::new("references"),
            script: ResultSlot::new("script"),
            acquisition: ResultSlot::new("acquisition"),
            blanker: ResultSlot::new("blanker"),
        }
    }

    /// Session counter, bumped by [`ThreadExchange::begin`]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Start a new session with resolved parameters
    pub fn begin(&mut self, camera: CameraId, geometry: ResolvedGeometry, timing: TimingPlan) {
        self.reset();
        self.session += 1;
        self.camera = Some(camera);
        self.geometry = Some(geometry);
        self.timing = Some(timing);
    }

    /// Clear every result slot and the resolved parameters
    ///
    /// Idempotent. Buffers held by the slots are dropped once.
    pub fn reset(&mut self) {
        self.camera = None;
        self.geometry = None;
        self.timing = None;
        self.insertion.reset();
        self.references.reset();
        self.script.reset();
        self.acquisition.reset();
        self.blanker.reset();
    }

    /// Whether any slot still holds an unread result
    pub fn has_results(&self) -> bool {
        self.insertion.is_filled()
            || self.references.is_filled()
            || self.script.is_filled()
            || self.acquisition.is_filled()
            || self.blanker.is_filled()
    }
}

impl Default for ThreadExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_writer_discarded() {
        let slot: ResultSlot<u32> = ResultSlot::new("test");
        let stale = slot.writer();
        slot.reset();
        assert!(!stale.publish(Ok(1)));
        assert!(slot.take().is_none());

        let fresh = slot.writer();
        assert!(fresh.publish(Ok(2)));
        assert_eq!(slot.take().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_reset_idempotent() {
        let mut exchange = ThreadExchange::new();
        exchange.acquisition.writer().publish(Ok(AcquisitionOutcome {
            image: ImageBuffer::filled_u16(2, 2, 1),
            frames_saved: 0,
            alignment: None,
            started_at: Instant::now(),
            elapsed_ms: 0.0,
        }));
        assert!(exchange.has_results());
        exchange.reset();
        exchange.reset();
        assert!(!exchange.has_results());
        assert!(exchange.camera.is_none());
    }
}
