//! Capture metric recording
//!
//! Thin wrappers over the `metrics` facade plus an in-memory aggregator
//! for run summaries.

use std::collections::BTreeMap;

use contracts::{AcquisitionError, Phase, ReferenceKind};
use metrics::{counter, gauge, histogram};

/// Record the end of one capture session
pub fn record_capture(result: Result<(), &AcquisitionError>, duration_ms: f64, retries: u32) {
    let status = match result {
        Ok(()) => "success",
        Err(e) => e.kind(),
    };
    counter!("camctl_captures_total", "status" => status).increment(1);
    histogram!("camctl_capture_duration_ms").record(duration_ms);
    gauge!("camctl_last_capture_retries").set(retries as f64);
}

/// Record one replay of a capture request
pub fn record_retry(error: &AcquisitionError) {
    counter!("camctl_capture_retries_total", "kind" => error.kind()).increment(1);
}

/// Record time spent in one phase
pub fn record_phase_duration(phase: Phase, duration_ms: f64) {
    histogram!("camctl_phase_duration_ms", "phase" => phase.as_str()).record(duration_ms);
}

/// Record how a reference was obtained: `hit`, `acquired` or `interpolated`
pub fn record_reference(kind: ReferenceKind, source: &'static str) {
    counter!(
        "camctl_reference_lookups_total",
        "kind" => kind.as_str(),
        "source" => source
    )
    .increment(1);
}

pub fn record_dark_rejected() {
    counter!("camctl_dark_rejections_total").increment(1);
}

/// Record a continuous-mode frame
pub fn record_continuous_frame(delivered: bool) {
    if delivered {
        counter!("camctl_continuous_frames_delivered_total").increment(1);
    } else {
        counter!("camctl_continuous_frames_dropped_total").increment(1);
    }
}

/// Record how late a blanker step ran against its schedule
pub fn record_blanker_tick(lateness_ms: f64) {
    histogram!("camctl_blanker_tick_ms").record(lateness_ms);
}

pub fn record_worker_abandoned(worker: &'static str) {
    counter!("camctl_workers_abandoned_total", "worker" => worker).increment(1);
}

/// Capture metrics aggregator
///
/// Keeps in-memory totals for printing a summary at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct CaptureMetricsAggregator {
    pub total_captures: u64,
    pub succeeded: u64,
    /// Failures by error kind
    pub failures: BTreeMap<String, u64>,
    pub retries: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub capture_ms: RunningStats,
    pub phase_ms: BTreeMap<String, RunningStats>,
}

impl CaptureMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, duration_ms: f64, retries: u32) {
        self.total_captures += 1;
        self.succeeded += 1;
        self.retries += retries as u64;
        self.capture_ms.push(duration_ms);
    }

    pub fn record_failure(&mut self, error: &AcquisitionError, retries: u32) {
        self.total_captures += 1;
        self.retries += retries as u64;
        *self.failures.entry(error.kind().to_string()).or_insert(0) += 1;
    }

    pub fn record_phase(&mut self, phase: Phase, duration_ms: f64) {
        self.phase_ms
            .entry(phase.as_str().to_string())
            .or_default()
            .push(duration_ms);
    }

    /// Add continuous-mode frame counters
    pub fn record_frames(&mut self, delivered: u64, dropped: u64) {
        self.frames_delivered += delivered;
        self.frames_dropped += dropped;
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_captures: self.total_captures,
            succeeded: self.succeeded,
            failures: self.failures.clone(),
            retries: self.retries,
            frames_delivered: self.frames_delivered,
            frames_dropped: self.frames_dropped,
            success_rate: if self.total_captures > 0 {
                self.succeeded as f64 / self.total_captures as f64 * 100.0
            } else {
                0.0
            },
            capture_ms: StatsSummary::from(&self.capture_ms),
            phase_ms: self
                .phase_ms
                .iter()
                .map(|(k, v)| (k.clone(), StatsSummary::from(v)))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_captures: u64,
    pub succeeded: u64,
    pub failures: BTreeMap<String, u64>,
    pub retries: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub success_rate: f64,
    pub capture_ms: StatsSummary,
    pub phase_ms: BTreeMap<String, StatsSummary>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Capture Summary ===")?;
        writeln!(
            f,
            "Captures: {} ({} ok, {:.2}%)",
            self.total_captures, self.succeeded, self.success_rate
        )?;
        writeln!(f, "Retries: {}", self.retries)?;
        if self.frames_delivered + self.frames_dropped > 0 {
            writeln!(
                f,
                "Continuous frames: {} delivered, {} dropped",
                self.frames_delivered, self.frames_dropped
            )?;
        }
        writeln!(f, "Capture time (ms): {}", self.capture_ms)?;

        if !self.phase_ms.is_empty() {
            writeln!(f, "Phase time (ms):")?;
            for (phase, stats) in &self.phase_ms {
                writeln!(f, "  {}: {}", phase, stats)?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for (kind, count) in &self.failures {
                writeln!(f, "  {}: {}", kind, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = CaptureMetricsAggregator::new();

        aggregator.record_success(120.0, 0);
        aggregator.record_success(80.0, 1);
        aggregator.record_failure(&AcquisitionError::UserAborted, 0);
        aggregator.record_phase(Phase::Acquiring, 50.0);
        aggregator.record_frames(3, 2);

        assert_eq!(aggregator.total_captures, 3);
        assert_eq!(aggregator.succeeded, 2);
        assert_eq!(aggregator.retries, 1);
        assert_eq!(aggregator.failures.get("user_aborted"), Some(&1));

        let summary = aggregator.summary();
        assert_eq!(summary.capture_ms.count, 2);
        assert!((summary.capture_ms.mean - 100.0).abs() < 1e-10);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = CaptureMetricsAggregator::new();
        aggregator.record_success(10.0, 0);
        aggregator.record_frames(4, 1);

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Captures: 1 (1 ok, 100.00%)"));
        assert!(output.contains("4 delivered, 1 dropped"));
    }
}
