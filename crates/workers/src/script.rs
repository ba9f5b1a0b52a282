//! Script worker: runs a backend-side script before the acquisition.

use std::sync::Arc;
use std::time::Duration;

use contracts::{AcquisitionError, CameraBackend};
use tracing::{info, instrument};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::exchange::SlotWriter;
use crate::handle::WorkerKind;
use crate::pool::WorkerPool;

#[instrument(name = "script_worker", skip(backend, token))]
pub fn run_script(
    backend: &dyn CameraBackend,
    script: &str,
    token: &CancelToken,
) -> std::result::Result<(), AcquisitionError> {
    if token.is_cancelled() {
        return Err(AcquisitionError::UserAborted);
    }
    backend.run_script(script)?;
    info!("script finished");
    Ok(())
}

pub fn spawn_script(
    pool: &mut WorkerPool,
    backend: Arc<dyn CameraBackend>,
    script: String,
    writer: SlotWriter<()>,
    timeout: Duration,
) -> Result<()> {
    pool.launch(WorkerKind::Script, timeout, move |token| {
        writer.publish(run_script(backend.as_ref(), &script, &token));
    })
}
