//! Run statistics.

use std::time::Duration;

use contracts::AcquisitionError;
use observability::CaptureMetricsAggregator;
use reference_cache::CacheStats;
use sequencer::CapturedImage;

/// Shape of the last captured frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub binning: u32,
    pub exposure_ms: f64,
}

/// Statistics from one `run`
#[derive(Debug, Default)]
pub struct RunStats {
    pub requested_frames: u64,
    /// Frames handed to the consumer
    pub frames: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub waited: u64,
    pub duration: Duration,
    pub last_frame: Option<FrameShape>,
    pub references: CacheStats,
    pub failure: Option<AcquisitionError>,
    pub metrics: CaptureMetricsAggregator,
}

impl RunStats {
    pub fn new(requested_frames: u64) -> Self {
        Self {
            requested_frames,
            ..Default::default()
        }
    }

    pub fn record_frame(&mut self, frame: &CapturedImage) {
        self.frames += 1;
        self.last_frame = Some(FrameShape {
            width: frame.image.width,
            height: frame.image.height,
            binning: frame.geometry.binning,
            exposure_ms: frame.timing.exposure_ms,
        });
    }

    pub fn record_continuous(&mut self, delivered: u64, dropped: u64, waited: u64) {
        self.delivered = delivered;
        self.dropped = dropped;
        self.waited = waited;
        self.metrics.record_frames(delivered, dropped);
    }

    /// Frames per second over the whole run
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");
        println!("Overview");
        println!("  Duration: {:.3}s", self.duration.as_secs_f64());
        println!("  Frames: {} of {}", self.frames, self.requested_frames);
        println!("  FPS: {:.2}", self.fps());
        if let Some(shape) = self.last_frame {
            println!(
                "  Last frame: {}x{} (binning {}, {:.1}ms)",
                shape.width, shape.height, shape.binning, shape.exposure_ms
            );
        }
        if self.requested_frames > 1 {
            println!(
                "  Continuous: {} delivered, {} dropped, {} skipped while waiting",
                self.delivered, self.dropped, self.waited
            );
        }

        println!("\nReference cache");
        println!("  Entries: {}", self.references.entries);
        println!("  Resident: {} bytes", self.references.resident_bytes);
        println!("  Evictions: {}", self.references.evictions);

        println!("\n{}", self.metrics.summary());
        if let Some(ref failure) = self.failure {
            println!("Failure: {} ({})", failure, failure.kind());
        }
    }
}
