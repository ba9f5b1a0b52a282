//! Acquisition worker
//!
//! Holds the liveness guard for the whole hardware call, checks the returned
//! size against the resolved geometry and, when the backend does not process
//! internally, applies dark subtraction / gain normalisation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    AcquireParams, AcquisitionError, CameraBackend, ImageBuffer, ImageProcessor, ProcessingMode,
};
use reference_cache::interpolate_dark;
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exchange::{AcquisitionOutcome, SlotWriter};
use crate::handle::WorkerKind;
use crate::liveness::LivenessGuard;
use crate::pool::WorkerPool;

/// Where the dark reference for processing comes from
#[derive(Debug, Clone)]
pub enum DarkSource {
    Exact(Arc<ImageBuffer>),
    /// Synthesised from two bracketing references
    Interpolated {
        lower: Arc<ImageBuffer>,
        lower_s: f64,
        upper: Arc<ImageBuffer>,
        upper_s: f64,
        exposure_s: f64,
        lower_ratio_correction: f64,
    },
}

impl DarkSource {
    pub fn resolve(&self) -> std::result::Result<Arc<ImageBuffer>, AcquisitionError> {
        match self {
            DarkSource::Exact(image) => Ok(image.clone()),
            DarkSource::Interpolated {
                lower,
                lower_s,
                upper,
                upper_s,
                exposure_s,
                lower_ratio_correction,
            } => {
                let image = interpolate_dark(
                    lower,
                    *lower_s,
                    upper,
                    *upper_s,
                    *exposure_s,
                    *lower_ratio_correction,
                )?;
                Ok(Arc::new(image))
            }
        }
    }
}

/// References and processor for core-side processing
#[derive(Clone)]
pub struct Processing {
    pub dark: Option<DarkSource>,
    pub gain: Option<Arc<ImageBuffer>>,
    pub processor: Arc<dyn ImageProcessor>,
}

impl Processing {
    fn apply(
        &self,
        mode: ProcessingMode,
        image: ImageBuffer,
    ) -> std::result::Result<ImageBuffer, AcquisitionError> {
        if mode == ProcessingMode::Unprocessed {
            return Ok(image);
        }
        let dark = self
            .dark
            .as_ref()
            .ok_or_else(|| AcquisitionError::fatal("dark reference missing for processing"))?
            .resolve()?;
        match mode {
            ProcessingMode::DarkSubtracted => self.processor.dark_subtract(&image, &dark),
            ProcessingMode::GainNormalized => {
                let gain = self
                    .gain
                    .as_ref()
                    .ok_or_else(|| AcquisitionError::fatal("gain reference missing for processing"))?;
                self.processor.gain_normalize(&image, &dark, gain)
            }
            ProcessingMode::Unprocessed => Ok(image),
        }
    }
}

pub struct AcquisitionJob {
    pub backend: Arc<dyn CameraBackend>,
    pub params: AcquireParams,
    /// `None` when the backend processes internally
    pub processing: Option<Processing>,
    pub guard: LivenessGuard,
}

/// Blocking body of the acquisition worker
#[instrument(
    name = "acquisition_worker",
    skip(job, token),
    fields(camera = job.params.camera, exposure_ms = job.params.timing.exposure_ms)
)]
pub fn run_acquisition(
    job: AcquisitionJob,
    token: &CancelToken,
) -> std::result::Result<AcquisitionOutcome, AcquisitionError> {
    let AcquisitionJob {
        backend,
        params,
        processing,
        guard,
    } = job;

    if token.is_cancelled() {
        return Err(AcquisitionError::UserAborted);
    }

    let started_at = Instant::now();
    let raw = backend.acquire_image(&params)?;
    if token.is_cancelled() {
        return Err(AcquisitionError::UserAborted);
    }

    let expected = params.geometry.image_size();
    if raw.image.size() != expected {
        return Err(AcquisitionError::SizeMismatch {
            expected,
            actual: raw.image.size(),
        });
    }

    let image = match &processing {
        Some(processing) => processing.apply(params.processing, raw.image)?,
        None => raw.image,
    };
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    debug!(elapsed_ms, frames_saved = raw.frames_saved, "acquisition complete");
    guard.complete();

    Ok(AcquisitionOutcome {
        image,
        frames_saved: raw.frames_saved,
        alignment: raw.alignment,
        started_at,
        elapsed_ms,
    })
}

pub fn spawn_acquisition(
    pool: &mut WorkerPool,
    job: AcquisitionJob,
    writer: SlotWriter<AcquisitionOutcome>,
    timeout: Duration,
) -> Result<()> {
    pool.launch(WorkerKind::Acquisition, timeout, move |token| {
        writer.publish(run_acquisition(job, &token));
    })
}
