//! Capture phase sequencer
//!
//! Drives one capture session through
//! `Idle → RaisingScreen? → Inserting? → Settling? → EnsuringDark? → Acquiring
//! → RunningPostActions → Idle/Halted`.
//!
//! Every suspending phase launches at most one worker, registers a
//! poll / complete / error triple with the [`IdleScheduler`] and returns. The
//! next step runs from the completion callback on a later tick. Worker threads
//! never touch the session; they publish into their [`ThreadExchange`] slot.
//!
//! Any failure goes through [`CaptureSequencer::fail`], which either replays
//! the same request (retryable errors, bounded by `retry_limit`) or runs the
//! central [`CaptureSequencer::cleanup`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    AcquireParams, AcquisitionConfig, AcquisitionError, CameraDescriptor, CameraId,
    CaptureRequest, FlybackTable, ImageBuffer, ImageProcessor, Phase, PostAction,
    ReferenceKind, ResolvedGeometry, ScopeControl, StatusSink, TimingPlan,
};
use normalizer::{normalize, stem_scan_timing};
use observability::{
    record_capture, record_continuous_frame, record_phase_duration, record_reference,
    record_retry,
};
use reference_cache::{CacheLookup, EntryId, ReferenceCache, ReferenceQuery};
use tracing::{debug, error, info, instrument, warn};
use workers::timeouts::{acquisition_timeout, blanker_timeout, reference_timeout};
use workers::{
    spawn_acquisition, spawn_blanker, spawn_insertion, spawn_references, spawn_script,
    AcquisitionJob, BasicProcessor, BlankerJob, DarkSource, IdleScheduler, InsertionJob,
    Liveness, Processing, ReferenceJob, ReferenceShot, ThreadExchange, WorkerPool,
};

use crate::continuous::{ContinuousState, FrameDisposition};
use crate::selector::{BackendSelector, CameraSlot};
use crate::session::{CapturedImage, SessionCounters, SessionState};

/// Scheduler type the sequencer suspends on
pub type Scheduler = IdleScheduler<CaptureSequencer>;

type Step = fn(&mut CaptureSequencer, &mut Scheduler) -> Result<(), AcquisitionError>;
type BusyCheck = fn(&CaptureSequencer) -> bool;

/// Outcome of [`CaptureSequencer::capture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// A session is running; the request replaces any earlier pending one
    Queued,
}

/// The phase sequencer and everything it exclusively owns
pub struct CaptureSequencer {
    config: AcquisitionConfig,
    selector: BackendSelector,
    scope: Arc<dyn ScopeControl>,
    status: Arc<dyn StatusSink>,
    flyback: Option<Arc<dyn FlybackTable>>,
    processor: Arc<dyn ImageProcessor>,
    cache: ReferenceCache,
    pool: WorkerPool,
    exchange: ThreadExchange,
    liveness: Liveness,
    state: SessionState,
    results: VecDeque<Result<CapturedImage, AcquisitionError>>,
}

impl CaptureSequencer {
    pub fn new(
        config: AcquisitionConfig,
        scope: Arc<dyn ScopeControl>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            cache: ReferenceCache::new(config.cache.clone()),
            config,
            selector: BackendSelector::new(),
            scope,
            status,
            flyback: None,
            processor: Arc::new(BasicProcessor),
            pool: WorkerPool::new(),
            exchange: ThreadExchange::new(),
            liveness: Liveness::new(),
            state: SessionState::default(),
            results: VecDeque::new(),
        }
    }

    /// Flyback calibration used for STEM scan timing
    pub fn with_flyback(mut self, table: Arc<dyn FlybackTable>) -> Self {
        self.flyback = Some(table);
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn register_camera(
        &mut self,
        descriptor: CameraDescriptor,
        backend: Arc<dyn contracts::CameraBackend>,
    ) -> Result<(), AcquisitionError> {
        self.selector.register(descriptor, backend)
    }

    // ---- public surface --------------------------------------------------

    /// Start a session for `request`, or queue it while one is running
    #[instrument(name = "capture", skip(self, request, sched), fields(name = %request.name, camera = request.camera))]
    pub fn capture(
        &mut self,
        request: CaptureRequest,
        sched: &mut Scheduler,
    ) -> Result<Admission, AcquisitionError> {
        if self.selector.slot(request.camera).is_none() {
            return Err(AcquisitionError::configuration(format!(
                "unknown camera {}",
                request.camera
            )));
        }
        if self.state.is_active() {
            if self.state.pending.replace(request).is_some() {
                debug!("earlier pending request replaced");
            }
            return Ok(Admission::Queued);
        }
        self.start(request, sched);
        Ok(Admission::Started)
    }

    /// Ask for the session to stop at the next safe point
    pub fn halt(&mut self) {
        info!(phase = %self.state.phase, "halt requested");
        self.state.halt_requested = true;
    }

    /// Act on a pending halt; called by the host on every tick
    pub fn poll_halt(&mut self, sched: &mut Scheduler) {
        if !self.state.halt_requested {
            return;
        }
        if self.state.is_active() {
            self.cleanup(sched, Some(AcquisitionError::UserAborted));
        } else {
            self.state.halt_requested = false;
            self.state.pending = None;
            self.state.enter(Phase::Halted);
        }
    }

    /// Queue a one-shot action for the next acquisition's blanker
    pub fn queue_post_action(&mut self, action: PostAction) {
        debug!(action = action.label(), "post action queued");
        self.state.queued_actions.push(action);
    }

    pub fn queued_actions(&self) -> &[PostAction] {
        &self.state.queued_actions
    }

    /// Wait for the next distinct continuous frame from now
    pub fn request_next_frame(&mut self) {
        self.state.continuous.request_next();
    }

    pub fn take_continuous_frame(&mut self) -> Option<CapturedImage> {
        self.state.continuous.take()
    }

    /// Let the frame in flight finish the session
    pub fn stop_continuous(&mut self) {
        if self.state.continuous.repeat {
            info!(frames = self.state.continuous.frames, "continuous mode stopping");
        }
        self.state.continuous.repeat = false;
    }

    pub fn continuous(&self) -> &ContinuousState {
        &self.state.continuous
    }

    /// Oldest finished session result
    pub fn take_result(&mut self) -> Option<Result<CapturedImage, AcquisitionError>> {
        self.results.pop_front()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn is_idle(&self) -> bool {
        !self.state.is_active()
    }

    pub fn retries(&self) -> u32 {
        self.state.retries
    }

    pub fn counters(&self) -> SessionCounters {
        self.state.counters
    }

    pub fn pending_request(&self) -> Option<&CaptureRequest> {
        self.state.pending.as_ref()
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    pub fn workers_busy(&self) -> bool {
        self.pool.any_busy()
    }

    /// Drop a camera's cache-owned references after a readout change
    pub fn invalidate_references(
        &mut self,
        camera: CameraId,
        reason: &str,
    ) -> Result<usize, AcquisitionError> {
        if self.state.is_active() {
            return Err(AcquisitionError::configuration(
                "references cannot be invalidated during a capture",
            ));
        }
        Ok(self.cache.invalidate(camera, reason))
    }

    /// Store a reference supplied from outside the core
    pub fn add_external_reference(
        &mut self,
        query: &ReferenceQuery,
        image: ImageBuffer,
    ) -> Result<EntryId, AcquisitionError> {
        let id = self.cache.add_external(query, image)?;
        record_reference(query.kind, "external");
        Ok(id)
    }

    // ---- session lifecycle -----------------------------------------------

    fn start(&mut self, request: CaptureRequest, sched: &mut Scheduler) {
        info!(
            name = %request.name,
            camera = request.camera,
            exposure_s = request.exposure_s,
            continuous = request.is_continuous(),
            "capture session started"
        );
        self.state.begin(request);
        self.run_step(sched, Self::prepare);
    }

    fn run_step(&mut self, sched: &mut Scheduler, step: Step) {
        if self.state.halt_requested {
            self.cleanup(sched, Some(AcquisitionError::UserAborted));
            return;
        }
        if let Err(err) = step(self, sched) {
            self.fail(sched, err);
        }
    }

    /// Retry the request or hand the error to cleanup
    pub fn fail(&mut self, sched: &mut Scheduler, err: AcquisitionError) {
        if !self.state.is_active() {
            debug!(error = %err, "failure after session end ignored");
            return;
        }
        let retryable = err.is_retryable() && !self.state.halt_requested;
        if retryable && self.state.retries < self.config.retry_limit {
            self.state.retries += 1;
            self.state.counters.retries += 1;
            record_retry(&err);
            warn!(
                error = %err,
                phase = %self.state.phase,
                attempt = self.state.retries,
                limit = self.config.retry_limit,
                "replaying capture request"
            );
            self.teardown(sched);
            self.run_step(sched, Self::prepare);
            return;
        }
        let err = if retryable {
            AcquisitionError::fatal(format!(
                "retry limit {} exhausted: {err}",
                self.config.retry_limit
            ))
        } else {
            err
        };
        self.cleanup(sched, Some(err));
    }

    /// Central cleanup, safe to call from any phase and more than once
    ///
    /// Stops every worker (abandoning those that ignore the cancel token),
    /// releases the liveness handshake, reblanks, restores backend defaults,
    /// drops unfilled references and queued actions, reports `error` and
    /// leaves the session Idle, or Halted after a halt.
    #[instrument(name = "cleanup", skip(self, sched, error), fields(phase = %self.state.phase))]
    pub fn cleanup(&mut self, sched: &mut Scheduler, error: Option<AcquisitionError>) {
        let was_active = self.state.is_active();
        self.teardown(sched);
        self.state.queued_actions.clear();
        self.state.counters.cleanups += 1;
        if !was_active {
            return;
        }

        if let Some(slot) = self.selector.active() {
            if let Err(e) = slot.backend.restore_defaults() {
                warn!(camera = slot.descriptor.id, error = %e, "restoring camera defaults failed");
            }
        }

        if let Some(err) = error {
            error!(error = %err, kind = err.kind(), retries = self.state.retries, "capture failed");
            self.status.report_failure(&err);
            record_capture(Err(&err), self.state.elapsed_ms(), self.state.retries);
            self.state.counters.failed += 1;
            self.results.push_back(Err(err));
        }

        let halted = self.state.halt_requested;
        self.end_session(sched, if halted { Phase::Halted } else { Phase::Idle });
    }

    /// Stop workers and drop per-attempt state
    fn teardown(&mut self, sched: &mut Scheduler) {
        sched.cancel_all();
        if self.pool.any_busy() {
            self.pool.request_stop_all();
            if let Some(slot) = self.selector.active() {
                slot.backend.request_stop();
            }
        }
        let abandoned = self
            .pool
            .terminate_all(Duration::from_millis(self.config.stop_grace_ms));
        if abandoned > 0 {
            warn!(abandoned, "workers abandoned during teardown");
        }
        self.liveness.force_release();

        if self.state.timing.as_ref().is_some_and(TimingPlan::needs_blanker) {
            if let Err(e) = self.scope.set_beam_blank(true) {
                warn!(error = %e, "reblank during teardown failed");
            }
        }
        for (id, kind) in self.state.references.pending.drain(..) {
            if self.cache.discard(id) {
                debug!(id, kind = kind.as_str(), "unfilled reference discarded");
            }
        }
        self.state.frame = None;
        self.exchange.reset();
    }

    fn end_session(&mut self, sched: &mut Scheduler, phase: Phase) {
        self.state.enter(phase);
        for (phase, ms) in self.state.phase_times.drain(..) {
            record_phase_duration(phase, ms);
        }
        self.exchange.reset();
        self.state.clear_session();
        // references pinned while the session ran may have held the cache over its bound
        self.cache.trim();

        if phase == Phase::Halted {
            if self.state.pending.take().is_some() {
                debug!("pending request dropped by halt");
            }
            return;
        }
        if let Some(next) = self.state.pending.take() {
            self.state.counters.replayed += 1;
            info!(name = %next.name, "replaying pending request");
            self.start(next, sched);
        }
    }

    // ---- steps -----------------------------------------------------------

    /// Register a wait on `busy`; `next` runs once it reports false
    fn suspend(
        &self,
        sched: &mut Scheduler,
        name: &'static str,
        phase: Phase,
        timeout: Duration,
        busy: BusyCheck,
        next: Step,
    ) {
        let session = self.exchange.session();
        sched.register(
            name,
            move |seq| seq.is_current(session) && busy(seq),
            move |seq, sched| {
                if seq.is_current(session) {
                    seq.run_step(sched, next);
                }
            },
            move |seq, sched, waited_ms| {
                if seq.is_current(session) {
                    seq.fail(sched, AcquisitionError::Timeout { phase, waited_ms });
                }
            },
            timeout,
        );
    }

    fn is_current(&self, session: u64) -> bool {
        self.state.is_active() && self.exchange.session() == session
    }

    fn main_busy(&self) -> bool {
        self.pool.main_busy()
    }

    fn blanker_busy(&self) -> bool {
        self.pool.blanker_busy()
    }

    fn screen_busy(&self) -> bool {
        matches!(self.scope.screen_down(), Ok(true))
    }

    fn settling(&self) -> bool {
        self.state
            .settle_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Resolve camera, geometry and timing for the current attempt
    #[instrument(name = "prepare", skip(self, sched))]
    fn prepare(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let request = self.request()?.clone();
        let descriptor = self.selector.activate(request.camera)?.descriptor.clone();
        let (geometry, timing) = normalize(&request, &descriptor)?;

        let stem = match (&self.flyback, descriptor.capabilities.is_stem) {
            (Some(table), true) => Some(stem_scan_timing(
                &request,
                &geometry,
                &descriptor,
                table.as_ref(),
            )),
            _ => None,
        };
        if timing.shutter_fallback {
            warn!(camera = descriptor.id, shutter = ?timing.shutter, "requested shutter unavailable");
        }
        debug!(
            roi = ?geometry.roi,
            binning = geometry.binning,
            exposure_ms = timing.exposure_ms,
            total_ms = timing.total_ms,
            "request normalized"
        );

        self.exchange.begin(request.camera, geometry, timing.clone());
        self.state.descriptor = Some(descriptor);
        self.state.geometry = Some(geometry);
        self.state.timing = Some(timing);
        self.state.stem = stem;
        self.state.script_done = false;
        self.step_screen(sched)
    }

    fn step_screen(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        if !self.descriptor()?.needs_screen_raise() || !self.scope.screen_down()? {
            return self.step_insert(sched);
        }
        self.enter(Phase::RaisingScreen);
        self.status.status("raising screen");
        self.scope.raise_screen()?;
        self.suspend(
            sched,
            "raise_screen",
            Phase::RaisingScreen,
            Duration::from_millis(self.config.screen_timeout_ms),
            Self::screen_busy,
            Self::after_screen,
        );
        Ok(())
    }

    fn after_screen(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        if self.scope.screen_down()? {
            return Err(AcquisitionError::hardware_retryable("screen did not rise"));
        }
        self.step_insert(sched)
    }

    fn step_insert(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let slot = self.active_slot()?;
        let descriptor = &slot.descriptor;
        if !descriptor.capabilities.retractable || slot.backend.is_inserted(descriptor.id)? {
            return self.step_settle(sched);
        }
        if descriptor.capabilities.confirm_insertion
            && !self
                .status
                .confirm(&format!("Insert camera {}?", descriptor.name))
        {
            return Err(AcquisitionError::UserAborted);
        }

        self.enter(Phase::Inserting);
        self.status.status("inserting camera");
        let timeout = Duration::from_millis(
            self.config.insertion_timeout_ms + descriptor.timing.insertion_delay_ms,
        );
        let job = InsertionJob {
            backend: slot.backend.clone(),
            camera: descriptor.id,
            insert: true,
            delay: Duration::from_millis(descriptor.timing.insertion_delay_ms),
        };
        spawn_insertion(&mut self.pool, job, self.exchange.insertion.writer(), timeout)?;
        self.suspend(
            sched,
            "insertion",
            Phase::Inserting,
            timeout,
            Self::main_busy,
            Self::after_insertion,
        );
        Ok(())
    }

    fn after_insertion(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let result = self.exchange.insertion.take();
        self.collect(result, "insertion")?;
        self.step_settle(sched)
    }

    fn step_settle(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let Some(until) = self.state.settle_until else {
            return self.step_references(sched);
        };
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            self.state.settle_until = None;
            return self.step_references(sched);
        }
        self.enter(Phase::Settling);
        debug!(left_ms = left.as_millis() as u64, "settling");
        let timeout = left + Duration::from_millis(self.config.timeouts.base_margin_ms);
        self.suspend(
            sched,
            "settle",
            Phase::Settling,
            timeout,
            Self::settling,
            Self::after_settle,
        );
        Ok(())
    }

    fn after_settle(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        self.state.settle_until = None;
        self.step_references(sched)
    }

    /// Look up dark / gain references and acquire the missing or stale ones
    #[instrument(name = "ensure_references", skip(self, sched))]
    fn step_references(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let request = self.request()?.clone();
        let descriptor = self.descriptor()?.clone();
        let geometry = self.geometry()?;
        let timing = self.timing()?.clone();

        self.state.references = Default::default();
        if !request.processing.needs_dark() || descriptor.capabilities.processes_internally {
            return self.step_acquire(sched);
        }

        let exposure_s = timing.exposure_ms / 1000.0;
        let mut shots = Vec::new();

        let dark_query = ReferenceQuery::dark(request.camera, geometry, exposure_s)
            .with_group(request.kind)
            .with_delay(timing.startup_delay_ms)
            .forced(request.force_new_dark);
        let dark = self.cache.get_or_create(&dark_query);
        for slot in dark.slots(exposure_s) {
            if slot.needs_refresh {
                shots.push(ReferenceShot {
                    id: slot.id,
                    kind: ReferenceKind::Dark,
                    exposure_s: slot.exposure_s,
                });
            } else {
                record_reference(ReferenceKind::Dark, "cache");
            }
        }
        self.state.references.dark = Some(dark);

        if request.processing.needs_gain() {
            match self.cache.get_or_create(&ReferenceQuery::gain(request.camera, geometry)) {
                CacheLookup::Exact { id, needs_refresh } => {
                    if needs_refresh {
                        shots.push(ReferenceShot {
                            id,
                            kind: ReferenceKind::Gain,
                            exposure_s,
                        });
                    } else {
                        record_reference(ReferenceKind::Gain, "cache");
                    }
                    self.state.references.gain = Some(id);
                }
                CacheLookup::Bracketed { .. } => {
                    return Err(AcquisitionError::fatal("gain lookup returned a bracket"));
                }
            }
        }

        if shots.is_empty() {
            return self.step_acquire(sched);
        }
        self.state.references.pending = shots.iter().map(|s| (s.id, s.kind)).collect();

        self.enter(Phase::EnsuringDark);
        self.status
            .status(&format!("acquiring {} reference image(s)", shots.len()));
        let quality = self.config.dark_quality.clone();
        let attempts = shots.len() as u32 * quality.average_count * (1 + quality.bad_dark_retries);
        let longest = shots.iter().map(|s| s.exposure_s).fold(0.0, f64::max);
        let timeout = reference_timeout(longest, attempts, &descriptor, &self.config.timeouts);
        let job = ReferenceJob {
            backend: self.active_slot()?.backend,
            geometry,
            quality,
            shots,
        };
        spawn_references(&mut self.pool, job, self.exchange.references.writer(), timeout)?;
        self.suspend(
            sched,
            "references",
            Phase::EnsuringDark,
            timeout,
            Self::main_busy,
            Self::after_references,
        );
        Ok(())
    }

    fn after_references(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let result = self.exchange.references.take();
        let batch = self.collect(result, "reference")?;
        for (_, kind) in &self.state.references.pending {
            record_reference(*kind, "acquired");
        }
        let pinned = self.state.references.resolved_ids();
        self.cache.commit_all_protecting(batch, &pinned)?;
        self.state.references.pending.clear();
        self.step_acquire(sched)
    }

    fn step_acquire(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let script = if self.state.script_done {
            None
        } else {
            self.request()?.pre_script.clone()
        };
        let Some(script) = script else {
            return self.launch_acquisition(sched);
        };

        self.enter(Phase::Acquiring);
        let slot = self.active_slot()?;
        if !slot.descriptor.capabilities.supports_scripts {
            return Err(AcquisitionError::configuration(format!(
                "camera {} does not run scripts",
                slot.descriptor.id
            )));
        }
        let timeout = Duration::from_millis(self.config.timeouts.script_timeout_ms);
        spawn_script(
            &mut self.pool,
            slot.backend,
            script,
            self.exchange.script.writer(),
            timeout,
        )?;
        self.suspend(
            sched,
            "script",
            Phase::Acquiring,
            timeout,
            Self::main_busy,
            Self::after_script,
        );
        Ok(())
    }

    fn after_script(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let result = self.exchange.script.take();
        self.collect(result, "script")?;
        self.state.script_done = true;
        self.launch_acquisition(sched)
    }

    /// Launch the acquisition worker and, when there is work, the blanker
    #[instrument(name = "launch_acquisition", skip(self, sched), fields(frame = self.state.frame_index + 1))]
    fn launch_acquisition(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        self.enter(Phase::Acquiring);
        let request = self.request()?.clone();
        let slot = self.active_slot()?;
        let descriptor = &slot.descriptor;
        let timing = self.timing()?.clone();

        let processing = self.processing(&request, descriptor, &timing)?;
        let caps = &descriptor.capabilities;
        let frames = if request.frames.dose_fractionation {
            request.frames.frame_count(request.exposure_s)
        } else {
            1
        };
        let params = AcquireParams {
            camera: request.camera,
            geometry: self.geometry()?,
            timing: timing.clone(),
            processing: request.processing,
            frames,
            save_frames: request.frames.save_frames && caps.can_save_frames,
            align_frames: request.frames.align_frames && caps.can_align_frames,
            stem_channels: request.stem_channels.clone(),
        };

        let post_actions = std::mem::take(&mut self.state.queued_actions);
        self.record_settle(&timing, &post_actions);

        let timeout = acquisition_timeout(&params, descriptor, &self.config.timeouts, &post_actions);
        let guard = self.liveness.acquire(
            self.exchange.session(),
            Duration::from_millis(self.config.stop_grace_ms),
        )?;
        let blanker = BlankerJob {
            scope: self.scope.clone(),
            timing,
            scan: request.scan.clone(),
            post_actions,
            liveness: self.liveness.clone(),
        };
        let blanker_limit =
            blanker_timeout(&params, request.scan.as_ref(), &blanker.post_actions, &self.config.timeouts);

        let job = AcquisitionJob {
            backend: slot.backend.clone(),
            params,
            processing,
            guard,
        };
        spawn_acquisition(&mut self.pool, job, self.exchange.acquisition.writer(), timeout)?;
        if blanker.has_work() {
            spawn_blanker(&mut self.pool, blanker, self.exchange.blanker.writer(), blanker_limit)?;
        }
        self.suspend(
            sched,
            "acquisition",
            Phase::Acquiring,
            timeout,
            Self::main_busy,
            Self::after_acquisition,
        );
        Ok(())
    }

    fn after_acquisition(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let result = self.exchange.acquisition.take();
        let outcome = self.collect(result, "acquisition")?;
        let request = self.request()?;
        let frame = CapturedImage {
            request_name: request.name.clone(),
            camera: request.camera,
            image: outcome.image,
            geometry: self.geometry()?,
            timing: self.timing()?.clone(),
            frames_saved: outcome.frames_saved,
            alignment: outcome.alignment,
            stem: self.state.stem,
            blanker: None,
            started_at: outcome.started_at,
            frame_index: 0,
            retries: self.state.retries,
        };
        self.state.frame = Some(frame);

        self.enter(Phase::RunningPostActions);
        let Some(blanker) = self.pool.blanker().filter(|b| b.is_busy()) else {
            return self.finish_frame(sched);
        };
        let timeout = blanker.timeout().saturating_sub(blanker.elapsed())
            + Duration::from_millis(self.config.stop_grace_ms);
        self.suspend(
            sched,
            "post_actions",
            Phase::RunningPostActions,
            timeout,
            Self::blanker_busy,
            Self::finish_frame,
        );
        Ok(())
    }

    /// Hand the frame to the consumer and either re-acquire or end the session
    fn finish_frame(&mut self, sched: &mut Scheduler) -> Result<(), AcquisitionError> {
        let mut frame = self
            .state
            .frame
            .take()
            .ok_or_else(|| AcquisitionError::fatal("no acquired frame to finish"))?;
        frame.blanker = match self.exchange.blanker.take() {
            Some(report) => Some(report?),
            None => None,
        };
        if let Some(report) = frame.blanker.as_ref().filter(|r| r.aborted) {
            warn!(steps = report.steps_run, "blanker schedule aborted");
        }
        self.pool.reap();
        self.state.frame_index += 1;
        frame.frame_index = self.state.frame_index;

        if self.state.continuous.repeat && !self.state.halt_requested {
            let disposition = self.state.continuous.offer(frame);
            record_continuous_frame(disposition == FrameDisposition::Delivered);
            return self.launch_acquisition(sched);
        }

        let elapsed_ms = self.state.elapsed_ms();
        record_capture(Ok(()), elapsed_ms, self.state.retries);
        info!(
            frames = self.state.frame_index,
            elapsed_ms,
            retries = self.state.retries,
            "capture complete"
        );
        self.status.status("capture complete");
        self.state.counters.completed += 1;
        self.results.push_back(Ok(frame));
        self.end_session(sched, Phase::Idle);
        Ok(())
    }

    // ---- helpers ---------------------------------------------------------

    fn enter(&mut self, phase: Phase) {
        if self.state.phase == phase {
            return;
        }
        if let Some((previous, ms)) = self.state.enter(phase) {
            debug!(from = %previous, to = %phase, elapsed_ms = ms, "phase transition");
        }
    }

    /// Unwrap a worker's result once it has exited
    fn collect<T>(
        &mut self,
        result: Option<Result<T, AcquisitionError>>,
        worker: &str,
    ) -> Result<T, AcquisitionError> {
        self.pool.reap();
        result.unwrap_or_else(|| {
            Err(AcquisitionError::fatal(format!(
                "{worker} worker exited without a result"
            )))
        })
    }

    /// Build core-side processing from the session's reference plan
    fn processing(
        &mut self,
        request: &CaptureRequest,
        descriptor: &CameraDescriptor,
        timing: &TimingPlan,
    ) -> Result<Option<Processing>, AcquisitionError> {
        if !request.processing.needs_dark() || descriptor.capabilities.processes_internally {
            return Ok(None);
        }
        let plan = self.state.references.clone();
        let dark = match plan.dark {
            Some(CacheLookup::Exact { id, .. }) => DarkSource::Exact(self.reference(id)?),
            Some(CacheLookup::Bracketed { lower, upper }) => {
                let correction = match &self.config.cache.interpolation {
                    Some(interp) if !descriptor.capabilities.is_stem => interp.lower_ratio_correction,
                    _ => 1.0,
                };
                DarkSource::Interpolated {
                    lower: self.reference(lower.id)?,
                    lower_s: lower.exposure_s,
                    upper: self.reference(upper.id)?,
                    upper_s: upper.exposure_s,
                    exposure_s: timing.exposure_ms / 1000.0,
                    lower_ratio_correction: correction,
                }
            }
            None => return Err(AcquisitionError::fatal("dark reference was not prepared")),
        };
        let gain = match plan.gain {
            Some(id) => Some(self.reference(id)?),
            None => None,
        };
        Ok(Some(Processing {
            dark: Some(dark),
            gain,
            processor: self.processor.clone(),
        }))
    }

    fn reference(&mut self, id: EntryId) -> Result<Arc<ImageBuffer>, AcquisitionError> {
        self.cache
            .get(id)
            .ok_or_else(|| AcquisitionError::fatal(format!("reference {id} missing from cache")))
    }

    /// Remember when image shifts / stage moves queued for this shot settle
    fn record_settle(&mut self, timing: &TimingPlan, actions: &[PostAction]) {
        let settle = actions.iter().map(PostAction::settle_ms).max().unwrap_or(0);
        if settle == 0 {
            return;
        }
        let busy: u64 = actions.iter().map(PostAction::estimated_duration_ms).sum();
        let after = timing.post_action_delay_ms.max(0.0).ceil() as u64 + busy + settle;
        self.state.settle_until = Some(Instant::now() + Duration::from_millis(after));
    }

    fn request(&self) -> Result<&CaptureRequest, AcquisitionError> {
        self.state
            .request
            .as_ref()
            .ok_or_else(|| AcquisitionError::fatal("no capture request in session"))
    }

    fn descriptor(&self) -> Result<&CameraDescriptor, AcquisitionError> {
        self.state
            .descriptor
            .as_ref()
            .ok_or_else(|| AcquisitionError::fatal("session has no camera descriptor"))
    }

    fn geometry(&self) -> Result<ResolvedGeometry, AcquisitionError> {
        self.state
            .geometry
            .ok_or_else(|| AcquisitionError::fatal("session has no resolved geometry"))
    }

    fn timing(&self) -> Result<&TimingPlan, AcquisitionError> {
        self.state
            .timing
            .as_ref()
            .ok_or_else(|| AcquisitionError::fatal("session has no timing plan"))
    }

    fn active_slot(&self) -> Result<CameraSlot, AcquisitionError> {
        self.selector
            .active()
            .cloned()
            .ok_or_else(|| AcquisitionError::fatal("no active camera"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::{
        descriptor_for, RecordingStatus, ScopeConfig, ScopeEvent, SimulatedCamera,
        SimulatedConfig, SimulatedScope,
    };
    use contracts::{BackendFamily, CameraBackend, DarkInterpolationConfig, ProcessingMode};
    use std::thread;

    struct Rig {
        seq: CaptureSequencer,
        sched: Scheduler,
        camera: Arc<SimulatedCamera>,
        scope: Arc<SimulatedScope>,
        status: Arc<RecordingStatus>,
    }

    fn rig_with(family: BackendFamily, camera: SimulatedConfig, scope: ScopeConfig) -> Rig {
        build_rig(family, camera, scope, |_| {}, |_| {})
    }

    /// Fast simulated rig with config and descriptor adjusted before registration
    fn tweaked_rig(
        config: impl FnOnce(&mut AcquisitionConfig),
        descriptor: impl FnOnce(&mut CameraDescriptor),
    ) -> Rig {
        build_rig(
            BackendFamily::Simulated,
            SimulatedConfig {
                time_scale: 0.01,
                ..Default::default()
            },
            ScopeConfig::default(),
            config,
            descriptor,
        )
    }

    fn build_rig(
        family: BackendFamily,
        camera: SimulatedConfig,
        scope: ScopeConfig,
        tweak_config: impl FnOnce(&mut AcquisitionConfig),
        tweak_descriptor: impl FnOnce(&mut CameraDescriptor),
    ) -> Rig {
        let camera = Arc::new(SimulatedCamera::with_config(SimulatedConfig {
            family,
            ..camera
        }));
        let scope = Arc::new(SimulatedScope::with_config(scope));
        let status = Arc::new(RecordingStatus::new());
        let mut config = AcquisitionConfig::default();
        config.stop_grace_ms = 50;
        tweak_config(&mut config);
        let mut seq = CaptureSequencer::new(config, scope.clone(), status.clone());
        let mut descriptor = descriptor_for(family, 1, "cam");
        descriptor.timing.insertion_delay_ms = 0;
        tweak_descriptor(&mut descriptor);
        seq.register_camera(descriptor, camera.clone()).unwrap();
        Rig {
            seq,
            sched: Scheduler::new(),
            camera,
            scope,
            status,
        }
    }

    fn rig() -> Rig {
        rig_with(
            BackendFamily::Simulated,
            SimulatedConfig {
                time_scale: 0.01,
                ..Default::default()
            },
            ScopeConfig::default(),
        )
    }

    fn drive(rig: &mut Rig) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !rig.seq.is_idle() && Instant::now() < deadline {
            rig.seq.poll_halt(&mut rig.sched);
            rig.sched.tick(&mut rig.seq);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(rig.seq.is_idle(), "session did not finish");
    }

    #[test]
    fn test_plain_capture_completes() {
        let mut rig = rig();
        let admission = rig
            .seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_eq!(admission, Admission::Started);
        drive(&mut rig);

        let frame = rig.seq.take_result().unwrap().unwrap();
        assert_eq!(frame.frame_index, 1);
        assert_eq!(frame.image.size(), frame.geometry.image_size());
        assert_eq!(rig.seq.phase(), Phase::Idle);
        assert_eq!(rig.seq.counters().completed, 1);
        assert!(!rig.seq.workers_busy());
    }

    #[test]
    fn test_unknown_camera_rejected() {
        let mut rig = rig();
        let err = rig
            .seq
            .capture(CaptureRequest::new("record", 9, 0.05), &mut rig.sched)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Configuration { .. }));
        assert!(rig.seq.is_idle());
    }

    #[test]
    fn test_screen_raised_before_acquisition() {
        let mut rig = rig_with(
            BackendFamily::Simulated,
            SimulatedConfig {
                time_scale: 0.01,
                ..Default::default()
            },
            ScopeConfig {
                screen_down: true,
                screen_raise_ms: 5,
                ..Default::default()
            },
        );
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_eq!(rig.seq.phase(), Phase::RaisingScreen);
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
        assert!(rig.scope.events().contains(&ScopeEvent::RaiseScreen));
    }

    #[test]
    fn test_stuck_screen_times_out_then_fails() {
        let mut rig = rig_with(
            BackendFamily::Simulated,
            SimulatedConfig::default(),
            ScopeConfig {
                screen_down: true,
                screen_stuck: true,
                ..Default::default()
            },
        );
        rig.seq.config.screen_timeout_ms = 5;
        rig.seq.config.retry_limit = 1;
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        drive(&mut rig);

        let err = rig.seq.take_result().unwrap().unwrap_err();
        assert!(matches!(err, AcquisitionError::Fatal { .. }));
        assert_eq!(rig.seq.counters().retries, 1);
        assert_eq!(rig.status.failures().len(), 1);
    }

    #[test]
    fn test_request_while_busy_is_replayed() {
        let mut rig = rig();
        rig.seq
            .capture(CaptureRequest::new("first", 1, 0.05), &mut rig.sched)
            .unwrap();
        let admission = rig
            .seq
            .capture(CaptureRequest::new("second", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_eq!(admission, Admission::Queued);
        rig.seq
            .capture(CaptureRequest::new("third", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_eq!(rig.seq.pending_request().unwrap().name, "third");

        drive(&mut rig);
        assert_eq!(rig.seq.take_result().unwrap().unwrap().request_name, "first");
        assert_eq!(rig.seq.take_result().unwrap().unwrap().request_name, "third");
        assert!(rig.seq.take_result().is_none());
        assert_eq!(rig.seq.counters().replayed, 1);
    }

    #[test]
    fn test_halt_moves_to_halted_and_drops_pending() {
        let mut rig = rig_with(
            BackendFamily::Simulated,
            SimulatedConfig {
                time_scale: 1.0,
                ..Default::default()
            },
            ScopeConfig::default(),
        );
        rig.seq
            .capture(CaptureRequest::new("long", 1, 2.0), &mut rig.sched)
            .unwrap();
        rig.seq
            .capture(CaptureRequest::new("next", 1, 0.05), &mut rig.sched)
            .unwrap();
        rig.seq.halt();
        rig.seq.poll_halt(&mut rig.sched);

        assert_eq!(rig.seq.phase(), Phase::Halted);
        assert!(rig.seq.pending_request().is_none());
        assert!(matches!(
            rig.seq.take_result(),
            Some(Err(AcquisitionError::UserAborted))
        ));
        assert!(!rig.seq.workers_busy());
        assert!(rig.sched.is_empty());
    }

    #[test]
    fn test_cleanup_twice_is_stable() {
        let mut rig = rig();
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        rig.seq
            .cleanup(&mut rig.sched, Some(AcquisitionError::fatal("test")));
        let phase = rig.seq.phase();
        rig.seq
            .cleanup(&mut rig.sched, Some(AcquisitionError::fatal("again")));

        assert_eq!(phase, Phase::Idle);
        assert_eq!(rig.seq.phase(), Phase::Idle);
        assert_eq!(rig.status.failures().len(), 1);
        assert_eq!(rig.seq.counters().cleanups, 2);
        assert_eq!(rig.camera.restore_count(), 1);
    }

    #[test]
    fn test_queued_shift_causes_settling() {
        let mut rig = rig();
        rig.seq.queue_post_action(PostAction::ImageShift {
            x: 1.0,
            y: 0.0,
            settle_ms: 30,
        });
        rig.seq
            .capture(CaptureRequest::new("first", 1, 0.01), &mut rig.sched)
            .unwrap();
        drive(&mut rig);
        assert!(rig.seq.queued_actions().is_empty());
        assert_eq!(rig.scope.post_actions().len(), 1);

        rig.seq
            .capture(CaptureRequest::new("second", 1, 0.01), &mut rig.sched)
            .unwrap();
        assert_eq!(rig.seq.phase(), Phase::Settling);
        drive(&mut rig);
        assert_eq!(rig.seq.counters().completed, 2);
    }

    #[test]
    fn test_dark_subtracted_capture_caches_dark() {
        let mut rig = rig();
        let request =
            CaptureRequest::new("record", 1, 0.05).with_processing(ProcessingMode::DarkSubtracted);
        rig.seq.capture(request.clone(), &mut rig.sched).unwrap();
        assert_eq!(rig.seq.phase(), Phase::EnsuringDark);
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
        assert_eq!(rig.camera.reference_count(), 1);

        rig.seq.capture(request, &mut rig.sched).unwrap();
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
        assert_eq!(rig.camera.reference_count(), 1);
    }

    #[test]
    fn test_script_refused_by_camera_without_scripting() {
        let mut rig = rig();
        let mut request = CaptureRequest::new("record", 1, 0.05);
        request.pre_script = Some("prepare()".into());
        rig.seq.capture(request, &mut rig.sched).unwrap();
        drive(&mut rig);
        assert!(matches!(
            rig.seq.take_result(),
            Some(Err(AcquisitionError::Configuration { .. }))
        ));
    }

    #[test]
    fn test_retractable_camera_inserted_first() {
        let mut rig = tweaked_rig(|_| {}, |d| d.capabilities.retractable = true);
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_eq!(rig.seq.phase(), Phase::Inserting);
        drive(&mut rig);

        assert!(rig.seq.take_result().unwrap().is_ok());
        assert!(rig.camera.is_inserted(1).unwrap());
        assert!(rig.status.messages().iter().any(|m| m == "inserting camera"));

        // already inserted: the phase is skipped next time
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        assert_ne!(rig.seq.phase(), Phase::Inserting);
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
    }

    #[test]
    fn test_refused_insertion_aborts() {
        let mut rig = tweaked_rig(
            |_| {},
            |d| {
                d.capabilities.retractable = true;
                d.capabilities.confirm_insertion = true;
            },
        );
        rig.status.set_answer(false);
        rig.seq
            .capture(CaptureRequest::new("record", 1, 0.05), &mut rig.sched)
            .unwrap();
        drive(&mut rig);

        assert!(matches!(
            rig.seq.take_result(),
            Some(Err(AcquisitionError::UserAborted))
        ));
        assert_eq!(rig.status.prompts().len(), 1);
        assert_eq!(rig.camera.acquisition_count(), 0);
        assert!(!rig.camera.is_inserted(1).unwrap());
    }

    #[test]
    fn test_interpolated_dark_used_for_processing() {
        let mut rig = tweaked_rig(
            |c| {
                c.cache.interpolation = Some(DarkInterpolationConfig {
                    interval_s: 0.1,
                    min_exposure_s: 0.05,
                    lower_ratio_correction: 1.0,
                })
            },
            |_| {},
        );
        let request =
            CaptureRequest::new("record", 1, 0.15).with_processing(ProcessingMode::DarkSubtracted);
        rig.seq.capture(request.clone(), &mut rig.sched).unwrap();
        assert_eq!(rig.seq.phase(), Phase::EnsuringDark);
        drive(&mut rig);

        let frame = rig.seq.take_result().unwrap().unwrap();
        assert_eq!(frame.image.size(), frame.geometry.image_size());
        // both bracketing darks, no dark at the exact exposure
        assert_eq!(rig.camera.reference_count(), 2);

        // a nearby exposure reuses the same bracket
        let nearby =
            CaptureRequest::new("record", 1, 0.17).with_processing(ProcessingMode::DarkSubtracted);
        rig.seq.capture(nearby, &mut rig.sched).unwrap();
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
        assert_eq!(rig.camera.reference_count(), 2);
    }

    #[test]
    fn test_pre_script_runs_before_acquisition() {
        let mut rig = tweaked_rig(|_| {}, |d| d.capabilities.supports_scripts = true);
        let mut request = CaptureRequest::new("record", 1, 0.05);
        request.pre_script = Some("prepare()".into());
        rig.seq.capture(request, &mut rig.sched).unwrap();
        drive(&mut rig);

        assert!(rig.seq.take_result().unwrap().is_ok());
        assert_eq!(rig.camera.scripts_run(), vec!["prepare()".to_string()]);
        assert_eq!(rig.camera.acquisition_count(), 1);
    }

    #[test]
    fn test_invalidate_refused_during_capture() {
        let mut rig = rig();
        let request =
            CaptureRequest::new("record", 1, 0.05).with_processing(ProcessingMode::DarkSubtracted);
        rig.seq.capture(request.clone(), &mut rig.sched).unwrap();
        assert!(matches!(
            rig.seq.invalidate_references(1, "binning"),
            Err(AcquisitionError::Configuration { .. })
        ));
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());

        // idle again: the cached dark goes and the next capture takes a new one
        assert_eq!(rig.seq.invalidate_references(1, "binning").unwrap(), 1);
        rig.seq.capture(request, &mut rig.sched).unwrap();
        drive(&mut rig);
        assert!(rig.seq.take_result().unwrap().is_ok());
        assert_eq!(rig.camera.reference_count(), 2);
    }
}
