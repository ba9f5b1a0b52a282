//! # Workers
//!
//! Hardware-call wrappers that run on their own OS threads, and the
//! cooperative idle-poll scheduler that observes them.
//!
//! - [`WorkerHandle`]: named thread with a [`CancelToken`], `busy?` check and
//!   bounded hard-kill fallback
//! - [`WorkerPool`]: at most one main worker, plus the blanker beside an
//!   acquisition
//! - [`ThreadExchange`]: per-session context with one result slot per worker
//!   kind
//! - [`Liveness`]: acquisition / blanker handshake
//! - [`IdleScheduler`]: poll / complete / error triples driven by the host
//!
//! Workers never change session state. They publish into their slot and the
//! sequencer picks the result up on the next scheduler tick.

mod acquisition;
mod blanker;
mod cancel;
mod error;
mod exchange;
mod handle;
mod insertion;
mod liveness;
mod pool;
mod processor;
mod reference;
mod scheduler;
mod script;
pub mod timeouts;

pub use acquisition::{run_acquisition, spawn_acquisition, AcquisitionJob, DarkSource, Processing};
pub use blanker::{run_blanker, spawn_blanker, BlankerJob, BlankerReport, ScanReport, ScanSample};
pub use cancel::CancelToken;
pub use error::{Result, WorkerError};
pub use exchange::{AcquisitionOutcome, ReferenceBatch, ResultSlot, SlotWriter, ThreadExchange};
pub use handle::{Termination, WorkerHandle, WorkerKind};
pub use insertion::{run_insertion, spawn_insertion, InsertionJob};
pub use liveness::{Liveness, LivenessGuard};
pub use pool::WorkerPool;
pub use processor::BasicProcessor;
pub use reference::{acquire_checked, run_references, spawn_references, ReferenceJob, ReferenceShot};
pub use scheduler::{IdleScheduler, TaskId};
pub use script::{run_script, spawn_script};
