//! Worker threads with cooperative stop and a bounded hard-kill fallback
//!
//! Rust cannot kill a thread. When a worker ignores its [`CancelToken`] for
//! longer than the grace period its join handle is dropped and the thread is
//! left to finish on its own; its late result is discarded by the
//! generation-stamped [`crate::SlotWriter`]. A thread stuck inside a vendor
//! call stays alive until that call returns.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, WorkerError};

/// Worker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Insertion,
    Reference,
    Script,
    Acquisition,
    Blanker,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Insertion => "insertion",
            WorkerKind::Reference => "reference",
            WorkerKind::Script => "script",
            WorkerKind::Acquisition => "acquisition",
            WorkerKind::Blanker => "blanker",
        }
    }
}

/// How a terminated worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Thread exited and was joined
    Joined,
    /// Thread ignored the stop request and was detached
    Abandoned,
}

/// Sets the done flag when the worker body returns or unwinds
struct DoneFlag(Arc<AtomicBool>);

impl Drop for DoneFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Handle to one running worker thread
pub struct WorkerHandle {
    kind: WorkerKind,
    started: Instant,
    timeout: Duration,
    cancel: CancelToken,
    done: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("kind", &self.kind)
            .field("elapsed", &self.started.elapsed())
            .field("timeout", &self.timeout)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl WorkerHandle {
    /// Run `body` on a named OS thread
    pub fn spawn<F>(kind: WorkerKind, timeout: Duration, body: F) -> Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let token = cancel.clone();
        let flag = DoneFlag(done.clone());

        let join = thread::Builder::new()
            .name(format!("camctl-{}", kind.as_str()))
            .spawn(move || {
                let _flag = flag;
                body(token);
            })
            .map_err(|source| WorkerError::Spawn {
                worker: kind.as_str(),
                source,
            })?;

        debug!(worker = kind.as_str(), timeout_ms = timeout.as_millis() as u64, "worker started");
        Ok(Self {
            kind,
            started: Instant::now(),
            timeout,
            cancel,
            done,
            join: Some(join),
        })
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// The `busy?` check polled by the idle scheduler
    pub fn is_busy(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn timed_out(&self) -> bool {
        self.is_busy() && self.elapsed() > self.timeout
    }

    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Join a finished worker, surfacing a panic
    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(handle) => handle.join().map_err(|payload| WorkerError::Panicked {
                worker: self.kind.as_str(),
                message: panic_message(payload.as_ref()),
            }),
            None => Ok(()),
        }
    }

    /// Request a stop, wait up to `grace`, then join or abandon the thread
    pub fn terminate(mut self, grace: Duration) -> Termination {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;
        while self.is_busy() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        if self.is_busy() {
            warn!(
                worker = self.kind.as_str(),
                elapsed_ms = self.elapsed().as_millis() as u64,
                "worker ignored stop request, abandoning thread"
            );
            observability::record_worker_abandoned(self.kind.as_str());
            self.join.take();
            return Termination::Abandoned;
        }

        if let Some(handle) = self.join.take() {
            if let Err(payload) = handle.join() {
                warn!(
                    worker = self.kind.as_str(),
                    panic = %panic_message(payload.as_ref()),
                    "worker panicked"
                );
            }
        }
        Termination::Joined
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
