//! Simulated camera backend
//!
//! Implements `CameraBackend` for any backend family, with injectable
//! failures so every sequencer path can be exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use contracts::{
    AcquireParams, AlignmentStats, BackendError, BackendFamily, CameraBackend, CameraId,
    ImageBuffer, PixelData, RawCapture, ReferenceKind, ResolvedGeometry,
};
use tracing::{debug, instrument, trace};

use crate::lock;

/// Upper bound on a simulated hang so abandoned threads eventually exit
const MAX_HANG: Duration = Duration::from_secs(10);

/// Simulated camera configuration (failure injection included)
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub family: BackendFamily,
    /// Real time slept per millisecond of exposure (0 = instant)
    pub time_scale: f64,
    /// Base pixel value of images
    pub signal: u16,
    /// Pixel value of good dark references
    pub dark_mean: u16,
    /// Pixel value of rejected dark references
    pub bad_dark_mean: u16,
    /// Number of upcoming darks returned with `bad_dark_mean`
    pub bad_darks: u32,
    /// Number of upcoming acquisitions failing with a transient error
    pub transient_failures: u32,
    /// Every acquisition fails with a permanent error
    pub permanent_failure: bool,
    /// Number of upcoming acquisitions that block until stopped
    pub hangs: u32,
    /// Blocked acquisitions ignore stop requests
    pub ignore_stop: bool,
    /// Return half-width images
    pub size_mismatch: bool,
    /// Return identical pixels for every frame
    pub repeat_frames: bool,
    /// Time insertion takes to report completion
    pub insertion_ms: u64,
    /// Script names that fail
    pub failing_scripts: Vec<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            family: BackendFamily::Simulated,
            time_scale: 0.0,
            signal: 1000,
            dark_mean: 100,
            bad_dark_mean: 60_000,
            bad_darks: 0,
            transient_failures: 0,
            permanent_failure: false,
            hangs: 0,
            ignore_stop: false,
            size_mismatch: false,
            repeat_frames: false,
            insertion_ms: 0,
            failing_scripts: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CameraState {
    selected: Option<CameraId>,
    /// camera -> time insertion was commanded and target state
    insertion: Vec<(CameraId, bool, Instant)>,
    last_error: Option<String>,
    scripts: Vec<String>,
}

/// Simulated camera backend
pub struct SimulatedCamera {
    config: SimulatedConfig,
    state: Mutex<CameraState>,
    frame_counter: AtomicU64,
    acquisitions: AtomicU32,
    references: AtomicU32,
    restores: AtomicU32,
    transient_left: AtomicU32,
    bad_darks_left: AtomicU32,
    hangs_left: AtomicU32,
    stop_requested: AtomicBool,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::with_config(SimulatedConfig::default())
    }

    pub fn with_config(config: SimulatedConfig) -> Self {
        Self {
            transient_left: AtomicU32::new(config.transient_failures),
            bad_darks_left: AtomicU32::new(config.bad_darks),
            hangs_left: AtomicU32::new(config.hangs),
            config,
            state: Mutex::new(CameraState::default()),
            frame_counter: AtomicU64::new(0),
            acquisitions: AtomicU32::new(0),
            references: AtomicU32::new(0),
            restores: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Number of `acquire_image` calls, failed ones included
    pub fn acquisition_count(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of `acquire_reference` calls
    pub fn reference_count(&self) -> u32 {
        self.references.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> u32 {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn selected_camera(&self) -> Option<CameraId> {
        lock(&self.state).selected
    }

    pub fn scripts_run(&self) -> Vec<String> {
        lock(&self.state).scripts.clone()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fail(&self, err: BackendError) -> BackendError {
        lock(&self.state).last_error = Some(err.message.clone());
        err
    }

    /// Sleep for a simulated duration, returning early on a stop request
    fn simulate(&self, duration_ms: f64) -> Result<(), BackendError> {
        let scaled_ms = (duration_ms * self.config.time_scale).max(0.0);
        let deadline = Instant::now() + Duration::from_secs_f64(scaled_ms / 1000.0);
        while Instant::now() < deadline {
            if self.stop_requested.load(Ordering::SeqCst) {
                return Err(self.fail(BackendError::new("acquisition stopped")));
            }
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(left.min(Duration::from_millis(1)));
        }
        Ok(())
    }

    fn hang(&self) -> Result<(), BackendError> {
        debug!("simulated acquisition hanging");
        let started = Instant::now();
        loop {
            if !self.config.ignore_stop && self.stop_requested.load(Ordering::SeqCst) {
                return Err(self.fail(BackendError::transient("acquisition stopped while hung")));
            }
            if started.elapsed() >= MAX_HANG {
                return Err(self.fail(BackendError::new("simulated hang expired")));
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn frame(&self, width: u32, height: u32) -> ImageBuffer {
        let n = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        let value = if self.config.repeat_frames {
            self.config.signal
        } else {
            self.config.signal.wrapping_add(n as u16)
        };
        ImageBuffer::filled_u16(width, height, value)
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SimulatedCamera {
    fn family(&self) -> BackendFamily {
        self.config.family
    }

    #[instrument(
        name = "sim_acquire_image",
        skip(self, params),
        fields(camera = params.camera, exposure_ms = params.timing.exposure_ms)
    )]
    fn acquire_image(&self, params: &AcquireParams) -> Result<RawCapture, BackendError> {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        if self.config.permanent_failure {
            return Err(self.fail(BackendError::new("simulated camera fault")));
        }
        if Self::take_one(&self.transient_left) {
            return Err(self.fail(BackendError::transient("simulated transient fault")));
        }
        if Self::take_one(&self.hangs_left) {
            self.hang()?;
        }

        self.simulate(params.timing.total_ms)?;

        let (mut width, height) = params.geometry.image_size();
        if self.config.size_mismatch {
            width /= 2;
        }
        let image = self.frame(width, height);
        trace!(width, height, "simulated frame");

        let alignment = params.align_frames.then_some(AlignmentStats {
            mean_shift_px: 0.4,
            max_shift_px: 1.1,
        });
        Ok(RawCapture {
            image,
            frames_saved: if params.save_frames { params.frames } else { 0 },
            alignment,
        })
    }

    #[instrument(name = "sim_acquire_reference", skip(self, geometry), fields(kind = kind.as_str()))]
    fn acquire_reference(
        &self,
        kind: ReferenceKind,
        geometry: &ResolvedGeometry,
        exposure_s: f64,
    ) -> Result<ImageBuffer, BackendError> {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.references.fetch_add(1, Ordering::SeqCst);
        if self.config.permanent_failure {
            return Err(self.fail(BackendError::new("simulated camera fault")));
        }
        self.simulate(exposure_s * 1000.0)?;

        let (width, height) = geometry.image_size();
        let pixels = width as usize * height as usize;
        let image = match kind {
            ReferenceKind::Dark => {
                let value = if Self::take_one(&self.bad_darks_left) {
                    self.config.bad_dark_mean
                } else {
                    self.config.dark_mean
                };
                ImageBuffer::filled_u16(width, height, value)
            }
            ReferenceKind::Gain => ImageBuffer {
                width,
                height,
                data: PixelData::F32(vec![1.0; pixels]),
            },
        };
        Ok(image)
    }

    fn set_insertion(&self, camera: CameraId, inserted: bool) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.insertion.retain(|(c, _, _)| *c != camera);
        state.insertion.push((camera, inserted, Instant::now()));
        debug!(camera, inserted, "insertion commanded");
        Ok(())
    }

    fn is_inserted(&self, camera: CameraId) -> Result<bool, BackendError> {
        let state = lock(&self.state);
        let done = Duration::from_millis(self.config.insertion_ms);
        Ok(state
            .insertion
            .iter()
            .find(|(c, _, _)| *c == camera)
            .map(|(_, target, at)| *target && at.elapsed() >= done)
            .unwrap_or(false))
    }

    fn select_camera(&self, camera: CameraId) -> Result<(), BackendError> {
        lock(&self.state).selected = Some(camera);
        Ok(())
    }

    fn last_error_string(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    fn run_script(&self, script: &str) -> Result<(), BackendError> {
        if self.config.failing_scripts.iter().any(|s| s == script) {
            return Err(self.fail(BackendError::new(format!("script '{script}' failed"))));
        }
        lock(&self.state).scripts.push(script.to_string());
        Ok(())
    }

    fn restore_defaults(&self) -> Result<(), BackendError> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}
