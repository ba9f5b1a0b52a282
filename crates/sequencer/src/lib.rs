//! # Sequencer
//!
//! Top-level capture state machine. Owns the reference cache, the backend
//! selector, the worker pool and the session state; the host drives it by
//! ticking the idle scheduler.
//!
//! ```ignore
//! let mut host = AcquisitionHost::new(sequencer);
//! host.capture(request)?;
//! host.drive_until_idle(Duration::from_secs(30)).await?;
//! let frame = host.take_result().unwrap()?;
//! ```

mod continuous;
mod host;
mod selector;
mod sequencer;
mod session;

pub use continuous::{ContinuousState, FrameDisposition};
pub use host::AcquisitionHost;
pub use selector::{BackendSelector, CameraSlot};
pub use sequencer::{Admission, CaptureSequencer, Scheduler};
pub use session::{CapturedImage, ReferencePlan, SessionCounters, SessionState};
