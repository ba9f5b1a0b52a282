//! Session orchestrator - wires simulated hardware to the sequencer and
//! drives one capture session to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use backends::{CalibrationTable, RecordingStatus, ScopeConfig, SimulatedCamera, SimulatedConfig, SimulatedScope};
use contracts::AcquisitionProfile;
use sequencer::{AcquisitionHost, CaptureSequencer, CapturedImage};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::RunStats;
use crate::error::{CliError, Result};

/// Screen travel time of the simulated microscope at time scale 1
const SCREEN_RAISE_MS: f64 = 200.0;

/// Insertion time of simulated retractable cameras at time scale 1
const INSERTION_MS: f64 = 500.0;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: AcquisitionProfile,
    pub control_set: String,
    /// Frames to capture, continuous mode above one
    pub frames: u64,
    pub timeout: Duration,
    pub time_scale: f64,
}

/// One simulated capture session
pub struct Session {
    config: SessionConfig,
    interrupted: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that halts the session when set
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Build the host with one simulated backend per described camera
    pub fn build_host(&self) -> Result<AcquisitionHost> {
        let scale = self.config.time_scale.max(0.0);
        let scope = Arc::new(SimulatedScope::with_config(ScopeConfig {
            screen_down: true,
            screen_raise_ms: (SCREEN_RAISE_MS * scale) as u64,
            ..Default::default()
        }));
        let status = Arc::new(RecordingStatus::new());
        let profile = &self.config.profile;

        let mut sequencer = CaptureSequencer::new(profile.acquisition.clone(), scope, status)
            .with_flyback(Arc::new(CalibrationTable::new(Vec::new())));
        for descriptor in &profile.cameras {
            let camera = SimulatedCamera::with_config(SimulatedConfig {
                family: descriptor.family,
                time_scale: scale,
                insertion_ms: (INSERTION_MS * scale) as u64,
                ..Default::default()
            });
            sequencer.register_camera(descriptor.clone(), Arc::new(camera))?;
        }
        Ok(AcquisitionHost::new(sequencer))
    }

    /// Run the session to completion
    pub async fn run(self) -> Result<RunStats> {
        let profile = &self.config.profile;
        let request = profile
            .control_set(&self.config.control_set)
            .cloned()
            .ok_or_else(|| CliError::unknown_control_set(&self.config.control_set))?;
        if profile.camera(request.camera).is_none() {
            return Err(CliError::UnknownCamera { id: request.camera });
        }

        let mut host = self.build_host()?;
        let tick = Duration::from_millis(profile.acquisition.scheduler_tick_ms.max(1));
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let mut stats = RunStats::new(self.config.frames);

        info!(
            control_set = %request.name,
            camera = request.camera,
            exposure_s = request.exposure_s,
            frames = self.config.frames,
            "Starting capture session"
        );

        if self.config.frames > 1 {
            host.capture(request.continuous())?;
            for _ in 0..self.config.frames {
                match self.next_frame(&mut host, tick, deadline).await? {
                    Some(frame) => stats.record_frame(&frame),
                    None => break,
                }
            }
            host.stop_continuous();
        } else {
            host.capture(request)?;
        }

        self.drive(&mut host, tick, deadline).await?;

        let continuous = host.continuous();
        stats.record_continuous(continuous.delivered, continuous.dropped, continuous.waited);
        stats.duration = started.elapsed();
        stats.references = host.sequencer().cache().stats();

        while let Some(result) = host.take_result() {
            let elapsed_ms = stats.duration.as_secs_f64() * 1000.0;
            match result {
                Ok(frame) => {
                    stats.metrics.record_success(elapsed_ms, frame.retries);
                    if self.config.frames <= 1 {
                        stats.record_frame(&frame);
                    }
                }
                Err(e) => {
                    stats.metrics.record_failure(&e, host.sequencer().retries());
                    stats.failure = Some(e);
                }
            }
        }
        Ok(stats)
    }

    /// Wait for the next distinct continuous frame
    async fn next_frame(
        &self,
        host: &mut AcquisitionHost,
        tick: Duration,
        deadline: Instant,
    ) -> Result<Option<CapturedImage>> {
        host.request_next_frame();
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.check_interrupt(host);
            host.tick();
            if let Some(frame) = host.take_continuous_frame() {
                return Ok(Some(frame));
            }
            if host.is_idle() {
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out(host));
            }
        }
    }

    /// Tick until the session has ended
    async fn drive(&self, host: &mut AcquisitionHost, tick: Duration, deadline: Instant) -> Result<()> {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while !host.is_idle() {
            interval.tick().await;
            self.check_interrupt(host);
            host.tick();
            if !host.is_idle() && Instant::now() >= deadline {
                return Err(self.timed_out(host));
            }
        }
        Ok(())
    }

    fn check_interrupt(&self, host: &mut AcquisitionHost) {
        if self.interrupted.swap(false, Ordering::SeqCst) {
            warn!(phase = %host.phase(), "Interrupted, halting session");
            host.halt();
        }
    }

    fn timed_out(&self, host: &mut AcquisitionHost) -> CliError {
        warn!(phase = %host.phase(), "Session timed out, halting");
        host.halt();
        host.tick();
        CliError::SessionTimeout {
            seconds: self.config.timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::descriptor_for;
    use contracts::{AcquisitionConfig, BackendFamily, CaptureRequest, ConfigVersion};

    fn profile() -> AcquisitionProfile {
        AcquisitionProfile {
            version: ConfigVersion::V1,
            cameras: vec![descriptor_for(BackendFamily::Simulated, 1, "sim")],
            acquisition: AcquisitionConfig {
                scheduler_tick_ms: 1,
                ..Default::default()
            },
            control_sets: vec![CaptureRequest::new("record", 1, 0.05)],
        }
    }

    fn session(control_set: &str, frames: u64) -> Session {
        Session::new(SessionConfig {
            profile: profile(),
            control_set: control_set.to_string(),
            frames,
            timeout: Duration::from_secs(10),
            time_scale: 0.0,
        })
    }

    #[tokio::test]
    async fn test_single_capture() {
        let stats = session("record", 1).run().await.unwrap();
        assert!(stats.failure.is_none());
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.metrics.summary().succeeded, 1);
    }

    #[tokio::test]
    async fn test_continuous_capture() {
        let stats = session("record", 3).run().await.unwrap();
        assert!(stats.failure.is_none());
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.delivered, 3);
    }

    #[tokio::test]
    async fn test_unknown_control_set() {
        let err = session("missing", 1).run().await.unwrap_err();
        assert!(matches!(err, CliError::UnknownControlSet { .. }));
    }
}
