//! Host facade
//!
//! Owns the sequencer and the idle scheduler and plays the role of the host
//! event loop: every tick acts on a pending halt, then polls the idle tasks.

use std::time::{Duration, Instant};

use contracts::{AcquisitionError, CaptureRequest, Phase, PostAction};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::continuous::ContinuousState;
use crate::sequencer::{Admission, CaptureSequencer, Scheduler};
use crate::session::CapturedImage;

pub struct AcquisitionHost {
    sequencer: CaptureSequencer,
    scheduler: Scheduler,
    tick: Duration,
}

impl AcquisitionHost {
    pub fn new(sequencer: CaptureSequencer) -> Self {
        let tick = Duration::from_millis(sequencer.config().scheduler_tick_ms.max(1));
        Self {
            sequencer,
            scheduler: Scheduler::new(),
            tick,
        }
    }

    pub fn sequencer(&self) -> &CaptureSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut CaptureSequencer {
        &mut self.sequencer
    }

    pub fn capture(&mut self, request: CaptureRequest) -> Result<Admission, AcquisitionError> {
        self.sequencer.capture(request, &mut self.scheduler)
    }

    pub fn halt(&mut self) {
        self.sequencer.halt();
    }

    pub fn queue_post_action(&mut self, action: PostAction) {
        self.sequencer.queue_post_action(action);
    }

    pub fn request_next_frame(&mut self) {
        self.sequencer.request_next_frame();
    }

    pub fn take_continuous_frame(&mut self) -> Option<CapturedImage> {
        self.sequencer.take_continuous_frame()
    }

    pub fn stop_continuous(&mut self) {
        self.sequencer.stop_continuous();
    }

    pub fn continuous(&self) -> &ContinuousState {
        self.sequencer.continuous()
    }

    pub fn take_result(&mut self) -> Option<Result<CapturedImage, AcquisitionError>> {
        self.sequencer.take_result()
    }

    pub fn phase(&self) -> Phase {
        self.sequencer.phase()
    }

    pub fn is_idle(&self) -> bool {
        self.sequencer.is_idle()
    }

    /// Idle tasks currently registered
    pub fn pending_tasks(&self) -> Vec<&'static str> {
        self.scheduler.task_names()
    }

    /// One pass of the host loop; returns resolved task count
    pub fn tick(&mut self) -> usize {
        self.sequencer.poll_halt(&mut self.scheduler);
        self.scheduler.tick(&mut self.sequencer)
    }

    /// Run the central cleanup from outside a session
    pub fn cleanup(&mut self) {
        self.sequencer.cleanup(&mut self.scheduler, None);
    }

    /// Tick on the calling thread until the sequencer is idle
    ///
    /// Halts the session when `timeout` elapses first.
    pub fn run_until_idle(&mut self, timeout: Duration) -> Result<(), AcquisitionError> {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return Err(self.give_up(timeout));
            }
            self.tick();
            std::thread::sleep(self.tick);
        }
        Ok(())
    }

    /// Async variant of [`run_until_idle`](Self::run_until_idle) for hosts on
    /// a tokio runtime
    pub async fn drive_until_idle(&mut self, timeout: Duration) -> Result<(), AcquisitionError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                return Err(self.give_up(timeout));
            }
            interval.tick().await;
            let resolved = self.tick();
            if resolved > 0 {
                debug!(resolved, phase = %self.phase(), "idle tasks resolved");
            }
        }
        Ok(())
    }

    fn give_up(&mut self, timeout: Duration) -> AcquisitionError {
        let phase = self.phase();
        warn!(phase = %phase, timeout_ms = timeout.as_millis() as u64, "host gave up waiting");
        self.halt();
        self.tick();
        AcquisitionError::Timeout {
            phase,
            waited_ms: timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use backends::{descriptor_for, RecordingStatus, SimulatedCamera, SimulatedConfig, SimulatedScope};
    use contracts::{AcquisitionConfig, BackendFamily};

    fn host(time_scale: f64) -> AcquisitionHost {
        let mut config = AcquisitionConfig::default();
        config.scheduler_tick_ms = 1;
        config.stop_grace_ms = 50;
        let mut sequencer = CaptureSequencer::new(
            config,
            Arc::new(SimulatedScope::new()),
            Arc::new(RecordingStatus::new()),
        );
        sequencer
            .register_camera(
                descriptor_for(BackendFamily::Simulated, 1, "sim"),
                Arc::new(SimulatedCamera::with_config(SimulatedConfig {
                    time_scale,
                    ..Default::default()
                })),
            )
            .unwrap();
        AcquisitionHost::new(sequencer)
    }

    #[tokio::test]
    async fn test_drive_until_idle() {
        let mut host = host(0.01);
        host.capture(CaptureRequest::new("record", 1, 0.1)).unwrap();
        host.drive_until_idle(Duration::from_secs(5)).await.unwrap();
        assert!(host.take_result().unwrap().is_ok());
        assert!(host.pending_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_drive_timeout_halts() {
        let mut host = host(1.0);
        host.capture(CaptureRequest::new("record", 1, 5.0)).unwrap();
        let err = host
            .drive_until_idle(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout { .. }));
        assert_eq!(host.phase(), Phase::Halted);
        assert!(matches!(
            host.take_result(),
            Some(Err(AcquisitionError::UserAborted))
        ));
    }

    #[test]
    fn test_continuous_frames_until_stopped() {
        let mut host = host(0.0);
        host.capture(CaptureRequest::new("view", 1, 0.01).continuous())
            .unwrap();
        host.request_next_frame();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut frame = None;
        while frame.is_none() && Instant::now() < deadline {
            host.tick();
            frame = host.take_continuous_frame();
        }
        let frame = frame.unwrap();
        assert!(frame.frame_index >= 1);
        assert!(!host.is_idle());

        host.stop_continuous();
        host.run_until_idle(Duration::from_secs(5)).unwrap();
        assert!(host.take_result().unwrap().is_ok());
        assert_eq!(host.continuous().delivered, 1);
    }
}
