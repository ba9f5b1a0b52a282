//! Post-action ("blanker") worker
//!
//! A millisecond scheduler that runs beside the acquisition call. Its
//! timeline is fixed at launch from the timing plan:
//!
//! 1. pre-exposure blank / unblank steps
//! 2. mid-exposure scan ticks, if a scan is planned
//! 3. the final reblank, when the core owns the blanker
//! 4. queued post-exposure actions, once the post-action delay has passed
//!
//! The beam is always left blanked when the plan owns the blanker, whether
//! the schedule finishes, is cancelled, or aborts because the acquisition
//! worker released the liveness handshake with a failure.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    AcquisitionError, BlankerEvent, PostAction, ScanAxis, ScanPlan, ScopeControl, TimingPlan,
};
use observability::{RunningStats, StatsSummary};
use ringbuf::{traits::*, HeapRb};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exchange::SlotWriter;
use crate::liveness::Liveness;
use crate::pool::WorkerPool;

/// Scan samples kept for diagnostics
const SCAN_LOG_CAPACITY: usize = 256;

/// One scan tick as performed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSample {
    /// Offset from the start of the schedule
    pub at_ms: f64,
    pub value: f64,
}

/// Scan diagnostics
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub axis: ScanAxis,
    pub values: StatsSummary,
    /// Actual spacing between consecutive ticks
    pub tick_interval_ms: StatsSummary,
    /// Most recent samples, oldest first
    pub recent: Vec<ScanSample>,
}

/// What the blanker did
#[derive(Debug, Clone, Default)]
pub struct BlankerReport {
    pub steps_run: usize,
    pub actions_applied: Vec<&'static str>,
    pub scan: Option<ScanReport>,
    /// Lateness of every step against its schedule
    pub lateness_ms: StatsSummary,
    /// Stopped early because the acquisition failed
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Beam(BlankerEvent),
    Scan,
    Reblank,
    Action(PostAction),
}

#[derive(Debug, Clone, PartialEq)]
struct Scheduled {
    at_ms: f64,
    step: Step,
}

pub struct BlankerJob {
    pub scope: Arc<dyn ScopeControl>,
    pub timing: TimingPlan,
    pub scan: Option<ScanPlan>,
    pub post_actions: Vec<PostAction>,
    pub liveness: Liveness,
}

impl fmt::Debug for BlankerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlankerJob")
            .field("timing", &self.timing)
            .field("scan", &self.scan)
            .field("post_actions", &self.post_actions)
            .finish()
    }
}

impl BlankerJob {
    /// Whether there is anything for the blanker to do
    pub fn has_work(&self) -> bool {
        self.timing.needs_blanker() || self.scan.is_some() || !self.post_actions.is_empty()
    }

    fn owns_blanker(&self) -> bool {
        self.timing.needs_blanker()
    }

    fn timeline(&self) -> Vec<Scheduled> {
        let mut items: Vec<Scheduled> = self
            .timing
            .pre_exposure
            .iter()
            .map(|s| Scheduled {
                at_ms: s.at_ms,
                step: Step::Beam(s.event),
            })
            .collect();

        if let Some(scan) = &self.scan {
            let tick = scan.tick_ms.max(1);
            let mut t = scan.start_ms;
            while t <= scan.end_ms() {
                items.push(Scheduled {
                    at_ms: t as f64,
                    step: Step::Scan,
                });
                t += tick;
            }
        }

        let mut cursor = self.timing.post_action_delay_ms;
        if let Some(reblank) = self.timing.reblank_at_ms {
            items.push(Scheduled {
                at_ms: reblank,
                step: Step::Reblank,
            });
            cursor = cursor.max(reblank);
        }

        for action in &self.post_actions {
            match action {
                PostAction::FocusSteps { steps, interval_ms } => {
                    for delta in steps {
                        items.push(Scheduled {
                            at_ms: cursor,
                            step: Step::Action(PostAction::Defocus { delta_um: *delta }),
                        });
                        cursor += *interval_ms as f64;
                    }
                }
                other => items.push(Scheduled {
                    at_ms: cursor,
                    step: Step::Action(other.clone()),
                }),
            }
        }

        items.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));
        items
    }
}

struct ScanState {
    plan: ScanPlan,
    values: RunningStats,
    intervals: RunningStats,
    last_tick: Option<f64>,
    log: HeapRb<ScanSample>,
}

impl ScanState {
    fn new(plan: ScanPlan) -> Self {
        Self {
            plan,
            values: RunningStats::default(),
            intervals: RunningStats::default(),
            last_tick: None,
            log: HeapRb::new(SCAN_LOG_CAPACITY),
        }
    }

    fn record(&mut self, at_ms: f64, value: f64) {
        self.values.push(value);
        if let Some(last) = self.last_tick {
            self.intervals.push(at_ms - last);
        }
        self.last_tick = Some(at_ms);
        self.log.push_overwrite(ScanSample { at_ms, value });
    }

    fn report(&self) -> ScanReport {
        ScanReport {
            axis: self.plan.axis,
            values: StatsSummary::from(&self.values),
            tick_interval_ms: StatsSummary::from(&self.intervals),
            recent: self.log.iter().copied().collect(),
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Blocking body of the blanker worker
#[instrument(name = "blanker_worker", skip(job, token), fields(actions = job.post_actions.len()))]
pub fn run_blanker(
    job: &BlankerJob,
    token: &CancelToken,
) -> std::result::Result<BlankerReport, AcquisitionError> {
    let timeline = job.timeline();
    let mut scan = job.scan.clone().map(ScanState::new);
    let mut lateness = RunningStats::default();
    let mut report = BlankerReport::default();
    let start = Instant::now();

    let result = (|| {
        for item in &timeline {
            let deadline = start + Duration::from_secs_f64(item.at_ms.max(0.0) / 1000.0);
            if !token.sleep_until(deadline) {
                return Err(AcquisitionError::UserAborted);
            }
            if job.liveness.failed() && !job.liveness.is_held() {
                debug!("acquisition ended with failure, stopping schedule");
                report.aborted = true;
                return Ok(());
            }

            let late = elapsed_ms(start) - item.at_ms;
            lateness.push(late);
            observability::record_blanker_tick(late);

            match &item.step {
                Step::Beam(event) => {
                    job.scope.set_beam_blank(*event == BlankerEvent::Blank)?;
                }
                Step::Scan => {
                    if let Some(state) = scan.as_mut() {
                        let offset = item.at_ms - state.plan.start_ms as f64;
                        let value = state.plan.value_at(offset);
                        job.scope.set_scan_value(state.plan.axis, value)?;
                        state.record(elapsed_ms(start), value);
                    }
                }
                Step::Reblank => {
                    job.scope.set_beam_blank(true)?;
                }
                Step::Action(action) => {
                    job.scope.apply_post_action(action)?;
                    report.actions_applied.push(action.label());
                }
            }
            report.steps_run += 1;
        }
        Ok(())
    })();

    if job.owns_blanker() && (result.is_err() || report.aborted) {
        if let Err(e) = job.scope.set_beam_blank(true) {
            warn!(error = %e, "failed to reblank beam");
        }
    }

    report.scan = scan.as_ref().map(ScanState::report);
    report.lateness_ms = StatsSummary::from(&lateness);
    result.map(|()| report)
}

pub fn spawn_blanker(
    pool: &mut WorkerPool,
    job: BlankerJob,
    writer: SlotWriter<BlankerReport>,
    timeout: Duration,
) -> Result<()> {
    pool.launch_blanker(timeout, move |token| {
        writer.publish(run_blanker(&job, &token));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::{ScopeConfig, ScopeEvent, SimulatedScope};
    use contracts::{BlankerStep, ShutterSelection};

    fn software_timing() -> TimingPlan {
        TimingPlan {
            exposure_ms: 20.0,
            requested_exposure_ms: 20.0,
            drift_settle_ms: 0.0,
            startup_delay_ms: 2.0,
            shutter: ShutterSelection::Software,
            pre_exposure: vec![
                BlankerStep {
                    at_ms: 0.0,
                    event: BlankerEvent::Blank,
                },
                BlankerStep {
                    at_ms: 2.0,
                    event: BlankerEvent::Unblank,
                },
            ],
            reblank_at_ms: Some(22.0),
            post_action_delay_ms: 22.0,
            total_ms: 22.0,
            shutter_fallback: false,
        }
    }

    fn job(scope: Arc<SimulatedScope>, post_actions: Vec<PostAction>) -> BlankerJob {
        BlankerJob {
            scope,
            timing: software_timing(),
            scan: None,
            post_actions,
            liveness: Liveness::new(),
        }
    }

    #[test]
    fn test_order_blank_unblank_reblank_then_actions() {
        let scope = Arc::new(SimulatedScope::new());
        let job = job(
            scope.clone(),
            vec![
                PostAction::ImageShift {
                    x: 1.0,
                    y: 0.0,
                    settle_ms: 0,
                },
                PostAction::FocusSteps {
                    steps: vec![1.0, 2.0],
                    interval_ms: 3,
                },
            ],
        );
        let report = run_blanker(&job, &CancelToken::new()).unwrap();
        assert_eq!(report.actions_applied, vec!["image_shift", "defocus", "defocus"]);

        let events = scope.events();
        assert_eq!(events[0], ScopeEvent::Blank(true));
        assert_eq!(events[1], ScopeEvent::Blank(false));
        assert_eq!(events[2], ScopeEvent::Blank(true));
        assert!(matches!(events[3], ScopeEvent::PostAction(PostAction::ImageShift { .. })));
        assert!(scope.is_blanked());
    }

    #[test]
    fn test_cancel_reblanks() {
        let scope = Arc::new(SimulatedScope::new());
        let mut job = job(scope.clone(), Vec::new());
        job.timing.reblank_at_ms = Some(60_000.0);
        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };
        let err = run_blanker(&job, &token).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err, AcquisitionError::UserAborted);
        assert!(scope.is_blanked());
    }

    #[test]
    fn test_scan_statistics() {
        let scope = Arc::new(SimulatedScope::new());
        let mut job = job(scope.clone(), Vec::new());
        job.scan = Some(ScanPlan {
            axis: ScanAxis::StageTilt,
            start: 0.0,
            end: 10.0,
            start_ms: 2,
            duration_ms: 20,
            tick_ms: 5,
        });
        let report = run_blanker(&job, &CancelToken::new()).unwrap();
        let scan = report.scan.unwrap();
        assert_eq!(scan.values.count, 5);
        assert_eq!(scan.values.min, 0.0);
        assert_eq!(scan.values.max, 10.0);
        assert_eq!(scan.recent.len(), 5);
        assert_eq!(scan.tick_interval_ms.count, 4);
    }

    #[test]
    fn test_failed_action_surfaces_and_reblanks() {
        let scope = Arc::new(SimulatedScope::with_config(ScopeConfig {
            failing_actions: vec!["mag_change"],
            ..Default::default()
        }));
        let job = job(scope.clone(), vec![PostAction::MagChange { index: 4 }]);
        let err = run_blanker(&job, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, AcquisitionError::HardwareCallFailure { .. }));
        assert!(scope.is_blanked());
    }
}
