//! Continuous-mode frame hand-off
//!
//! A consumer asks for "the next frame" at t0. It is served the first frame
//! whose acquisition started at or after t0 and whose pixels differ from the
//! frame before it. Every other frame is dropped. Frames skipped while a
//! consumer waits are also counted as waited.

use std::time::Instant;

use tracing::trace;

use crate::session::CapturedImage;

/// Continuous-mode counters and hand-off slot
#[derive(Debug, Default)]
pub struct ContinuousState {
    /// Keep re-issuing acquisitions
    pub repeat: bool,
    pub frames: u64,
    pub delivered: u64,
    pub dropped: u64,
    /// Frames skipped while a consumer was waiting
    pub waited: u64,
    waiting_since: Option<Instant>,
    last_hash: Option<u64>,
    ready: Option<CapturedImage>,
}

/// What happened to an offered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Delivered,
    /// Nobody was waiting
    Dropped,
    /// Started before the wait began
    TooEarly,
    /// Same pixels as the previous frame
    Repeated,
}

impl ContinuousState {
    pub fn reset(&mut self, repeat: bool) {
        *self = Self {
            repeat,
            ..Self::default()
        };
    }

    /// Register a consumer waiting from now
    pub fn request_next(&mut self) {
        self.request_next_at(Instant::now());
    }

    pub fn request_next_at(&mut self, since: Instant) {
        self.waiting_since = Some(since);
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting_since.is_some()
    }

    /// Offer a newly acquired frame
    pub fn offer(&mut self, frame: CapturedImage) -> FrameDisposition {
        self.frames += 1;
        let hash = frame.image.content_hash();
        let repeated = self.last_hash == Some(hash);
        self.last_hash = Some(hash);

        let disposition = match self.waiting_since {
            None => FrameDisposition::Dropped,
            Some(since) if frame.started_at < since => FrameDisposition::TooEarly,
            Some(_) if repeated => FrameDisposition::Repeated,
            Some(_) => FrameDisposition::Delivered,
        };

        match disposition {
            FrameDisposition::Delivered => {
                self.waiting_since = None;
                self.delivered += 1;
                self.ready = Some(frame);
            }
            FrameDisposition::Dropped => self.dropped += 1,
            FrameDisposition::TooEarly | FrameDisposition::Repeated => {
                self.dropped += 1;
                self.waited += 1;
            }
        }
        trace!(?disposition, frames = self.frames, "continuous frame offered");
        disposition
    }

    /// Take the delivered frame, if any
    pub fn take(&mut self) -> Option<CapturedImage> {
        self.ready.take()
    }
}
