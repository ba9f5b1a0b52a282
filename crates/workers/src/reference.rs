//! Dark / gain reference ensure worker
//!
//! Acquires every missing or stale reference of one capture, averaging
//! repeats and re-acquiring darks that fail the quality check. Nothing is
//! written to the cache here; the sequencer commits the batch on success.

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AcquisitionError, CameraBackend, DarkQualityConfig, ImageBuffer, PixelData, ReferenceKind,
    ResolvedGeometry,
};
use reference_cache::EntryId;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exchange::{ReferenceBatch, SlotWriter};
use crate::handle::WorkerKind;
use crate::pool::WorkerPool;

/// One reference to acquire into a cache entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceShot {
    pub id: EntryId,
    pub kind: ReferenceKind,
    pub exposure_s: f64,
}

pub struct ReferenceJob {
    pub backend: Arc<dyn CameraBackend>,
    pub geometry: ResolvedGeometry,
    pub quality: DarkQualityConfig,
    pub shots: Vec<ReferenceShot>,
}

/// Acquire `count` references and average them
fn acquire_averaged(
    backend: &dyn CameraBackend,
    kind: ReferenceKind,
    geometry: &ResolvedGeometry,
    exposure_s: f64,
    count: u32,
    token: &CancelToken,
) -> std::result::Result<ImageBuffer, AcquisitionError> {
    let first = backend.acquire_reference(kind, geometry, exposure_s)?;
    if count <= 1 {
        return Ok(first);
    }

    let mut sum = first.data.to_f32();
    for _ in 1..count {
        if token.is_cancelled() {
            return Err(AcquisitionError::UserAborted);
        }
        let next = backend.acquire_reference(kind, geometry, exposure_s)?;
        if next.size() != first.size() {
            return Err(AcquisitionError::SizeMismatch {
                expected: first.size(),
                actual: next.size(),
            });
        }
        for (i, acc) in sum.iter_mut().enumerate() {
            *acc += next.data.value(i);
        }
    }
    let n = count as f32;
    sum.iter_mut().for_each(|v| *v /= n);
    ImageBuffer::new(first.width, first.height, PixelData::F32(sum))
}

/// Acquire one reference, re-acquiring darks that fail the quality check
#[instrument(
    name = "ensure_reference",
    skip(backend, geometry, quality, token),
    fields(kind = kind.as_str())
)]
pub fn acquire_checked(
    backend: &dyn CameraBackend,
    kind: ReferenceKind,
    geometry: &ResolvedGeometry,
    exposure_s: f64,
    quality: &DarkQualityConfig,
    token: &CancelToken,
) -> std::result::Result<ImageBuffer, AcquisitionError> {
    let attempts = match kind {
        ReferenceKind::Dark => 1 + quality.bad_dark_retries,
        ReferenceKind::Gain => 1,
    };

    let mut last = None;
    for attempt in 1..=attempts {
        if token.is_cancelled() {
            return Err(AcquisitionError::UserAborted);
        }
        let image = acquire_averaged(
            backend,
            kind,
            geometry,
            exposure_s,
            quality.average_count,
            token,
        )?;
        if kind == ReferenceKind::Gain {
            return Ok(image);
        }

        let stats = image.sample_stats(quality.sample_stride);
        if stats.mean <= quality.max_mean && stats.sd <= quality.max_sd {
            debug!(attempt, mean = stats.mean, sd = stats.sd, "dark reference accepted");
            return Ok(image);
        }
        warn!(
            attempt,
            attempts,
            mean = stats.mean,
            sd = stats.sd,
            "dark reference failed quality check"
        );
        observability::record_dark_rejected();
        last = Some(stats);
    }

    let detail = last
        .map(|s| format!("mean {:.1}, sd {:.1}", s.mean, s.sd))
        .unwrap_or_default();
    Err(AcquisitionError::hardware(format!(
        "dark reference rejected after {attempts} attempts ({detail})"
    )))
}

/// Blocking body of the reference-ensure worker
pub fn run_references(
    job: &ReferenceJob,
    token: &CancelToken,
) -> std::result::Result<ReferenceBatch, AcquisitionError> {
    let mut batch = Vec::with_capacity(job.shots.len());
    for shot in &job.shots {
        let image = acquire_checked(
            job.backend.as_ref(),
            shot.kind,
            &job.geometry,
            shot.exposure_s,
            &job.quality,
            token,
        )?;
        batch.push((shot.id, image));
    }
    Ok(batch)
}

pub fn spawn_references(
    pool: &mut WorkerPool,
    job: ReferenceJob,
    writer: SlotWriter<ReferenceBatch>,
    timeout: Duration,
) -> Result<()> {
    pool.launch(WorkerKind::Reference, timeout, move |token| {
        writer.publish(run_references(&job, &token));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::{SimulatedCamera, SimulatedConfig};
    use contracts::Roi;

    fn geometry() -> ResolvedGeometry {
        ResolvedGeometry {
            roi: Roi::full(32, 32),
            binning: 1,
        }
    }

    #[test]
    fn test_bad_dark_retried_then_accepted() {
        let backend = SimulatedCamera::with_config(SimulatedConfig {
            bad_darks: 1,
            ..Default::default()
        });
        let image = acquire_checked(
            &backend,
            ReferenceKind::Dark,
            &geometry(),
            0.5,
            &DarkQualityConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(image.data.value(0), 100.0);
        assert_eq!(backend.reference_count(), 2);
    }

    #[test]
    fn test_bad_dark_limit_exceeded() {
        let backend = SimulatedCamera::with_config(SimulatedConfig {
            bad_darks: 2,
            ..Default::default()
        });
        let err = acquire_checked(
            &backend,
            ReferenceKind::Dark,
            &geometry(),
            0.5,
            &DarkQualityConfig::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AcquisitionError::HardwareCallFailure { retryable: false, .. }));
    }

    #[test]
    fn test_averaging() {
        let backend = SimulatedCamera::new();
        let quality = DarkQualityConfig {
            average_count: 3,
            ..Default::default()
        };
        let image = acquire_checked(
            &backend,
            ReferenceKind::Dark,
            &geometry(),
            0.5,
            &quality,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(matches!(image.data, PixelData::F32(_)));
        assert_eq!(backend.reference_count(), 3);
    }
}
