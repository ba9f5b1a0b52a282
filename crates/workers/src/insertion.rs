//! Insertion worker: insert or retract one camera / detector.

use std::sync::Arc;
use std::time::Duration;

use contracts::{AcquisitionError, CameraBackend, CameraId};
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exchange::SlotWriter;
use crate::handle::WorkerKind;
use crate::pool::WorkerPool;

/// Interval between `is_inserted` polls
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct InsertionJob {
    pub backend: Arc<dyn CameraBackend>,
    pub camera: CameraId,
    /// `true` to insert, `false` to retract
    pub insert: bool,
    /// Fixed wait after the command before completion is polled
    pub delay: Duration,
}

/// Blocking body of the insertion worker
#[instrument(
    name = "insertion_worker",
    skip(job, token),
    fields(camera = job.camera, insert = job.insert)
)]
pub fn run_insertion(
    job: &InsertionJob,
    token: &CancelToken,
) -> std::result::Result<(), AcquisitionError> {
    job.backend.set_insertion(job.camera, job.insert)?;
    if !token.sleep(job.delay) {
        return Err(AcquisitionError::UserAborted);
    }
    loop {
        if job.backend.is_inserted(job.camera)? == job.insert {
            debug!("insertion complete");
            return Ok(());
        }
        if !token.sleep(POLL_INTERVAL) {
            return Err(AcquisitionError::UserAborted);
        }
    }
}

pub fn spawn_insertion(
    pool: &mut WorkerPool,
    job: InsertionJob,
    writer: SlotWriter<()>,
    timeout: Duration,
) -> Result<()> {
    pool.launch(WorkerKind::Insertion, timeout, move |token| {
        writer.publish(run_insertion(&job, &token));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use backends::{SimulatedCamera, SimulatedConfig};

    #[test]
    fn test_waits_for_hardware_completion() {
        let backend = Arc::new(SimulatedCamera::with_config(SimulatedConfig {
            insertion_ms: 20,
            ..Default::default()
        }));
        let job = InsertionJob {
            backend: backend.clone(),
            camera: 2,
            insert: true,
            delay: Duration::from_millis(1),
        };
        run_insertion(&job, &CancelToken::new()).unwrap();
        assert!(backend.is_inserted(2).unwrap());
    }

    #[test]
    fn test_cancelled_while_polling() {
        let backend = Arc::new(SimulatedCamera::with_config(SimulatedConfig {
            insertion_ms: 60_000,
            ..Default::default()
        }));
        let job = InsertionJob {
            backend,
            camera: 2,
            insert: true,
            delay: Duration::ZERO,
        };
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(run_insertion(&job, &token), Err(AcquisitionError::UserAborted));
    }
}
