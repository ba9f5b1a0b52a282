//! Enforces which workers may be alive together.
//!
//! At most one insertion / reference / script / acquisition worker runs at a
//! time. The blanker may only run alongside an acquisition worker.

use std::time::Duration;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Result, WorkerError};
use crate::handle::{Termination, WorkerHandle, WorkerKind};

#[derive(Debug, Default)]
pub struct WorkerPool {
    main: Option<WorkerHandle>,
    blanker: Option<WorkerHandle>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch the single main worker
    pub fn launch<F>(&mut self, kind: WorkerKind, timeout: Duration, body: F) -> Result<()>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        if kind == WorkerKind::Blanker {
            return self.launch_blanker(timeout, body);
        }
        self.reap();
        if let Some(running) = &self.main {
            return Err(WorkerError::Busy {
                running: running.kind().as_str(),
                requested: kind.as_str(),
            });
        }
        self.main = Some(WorkerHandle::spawn(kind, timeout, body)?);
        Ok(())
    }

    /// Launch the blanker next to the running acquisition worker
    pub fn launch_blanker<F>(&mut self, timeout: Duration, body: F) -> Result<()>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        match &self.main {
            Some(main) if main.kind() == WorkerKind::Acquisition => {}
            _ => return Err(WorkerError::NoAcquisition),
        }
        if let Some(blanker) = self.blanker.as_ref().filter(|b| b.is_busy()) {
            return Err(WorkerError::Busy {
                running: blanker.kind().as_str(),
                requested: WorkerKind::Blanker.as_str(),
            });
        }
        self.blanker = Some(WorkerHandle::spawn(WorkerKind::Blanker, timeout, body)?);
        Ok(())
    }

    pub fn main(&self) -> Option<&WorkerHandle> {
        self.main.as_ref()
    }

    pub fn blanker(&self) -> Option<&WorkerHandle> {
        self.blanker.as_ref()
    }

    pub fn main_busy(&self) -> bool {
        self.main.as_ref().is_some_and(|w| w.is_busy())
    }

    pub fn blanker_busy(&self) -> bool {
        self.blanker.as_ref().is_some_and(|w| w.is_busy())
    }

    pub fn any_busy(&self) -> bool {
        self.main_busy() || self.blanker_busy()
    }

    /// Join finished workers so their slots can be reused
    pub fn reap(&mut self) {
        for slot in [&mut self.main, &mut self.blanker] {
            if slot.as_ref().is_some_and(|w| !w.is_busy()) {
                if let Some(handle) = slot.take() {
                    let kind = handle.kind();
                    if let Err(e) = handle.join() {
                        debug!(worker = kind.as_str(), error = %e, "reaped failed worker");
                    }
                }
            }
        }
    }

    pub fn request_stop_all(&self) {
        for worker in [&self.main, &self.blanker].into_iter().flatten() {
            worker.request_stop();
        }
    }

    /// Terminate every worker; returns how many had to be abandoned
    pub fn terminate_all(&mut self, grace: Duration) -> usize {
        [self.main.take(), self.blanker.take()]
            .into_iter()
            .flatten()
            .map(|w| w.terminate(grace))
            .filter(|t| *t == Termination::Abandoned)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_main_worker() {
        let mut pool = WorkerPool::new();
        pool.launch(WorkerKind::Insertion, Duration::from_secs(1), |t| {
            t.sleep(Duration::from_secs(10));
        })
        .unwrap();
        let err = pool
            .launch(WorkerKind::Reference, Duration::from_secs(1), |_| {})
            .unwrap_err();
        assert!(matches!(err, WorkerError::Busy { running: "insertion", .. }));
        assert_eq!(pool.terminate_all(Duration::from_millis(500)), 0);
        assert!(!pool.any_busy());
    }

    #[test]
    fn test_blanker_needs_acquisition() {
        let mut pool = WorkerPool::new();
        assert!(matches!(
            pool.launch_blanker(Duration::from_secs(1), |_| {}),
            Err(WorkerError::NoAcquisition)
        ));
        pool.launch(WorkerKind::Acquisition, Duration::from_secs(1), |t| {
            t.sleep(Duration::from_secs(10));
        })
        .unwrap();
        pool.launch_blanker(Duration::from_secs(1), |t| {
            t.sleep(Duration::from_secs(10));
        })
        .unwrap();
        assert!(pool.blanker_busy());
        pool.terminate_all(Duration::from_millis(500));
    }
}
