//! Cache entry and key types.

use std::sync::Arc;
use std::time::Instant;

use contracts::{Binning, CameraId, ControlSetKind, ImageBuffer, ReferenceKind, ResolvedGeometry, Roi};

/// Slab key of a cache entry
pub type EntryId = usize;

/// Who supplied the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Acquired by the core, subject to compaction and invalidation
    Owned,
    /// Supplied from outside (e.g. loaded gain references)
    External,
}

/// What a caller is looking for
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceQuery {
    pub kind: ReferenceKind,
    pub camera: CameraId,
    /// Control-set kind of the requesting capture, used for the per-group dark cap
    pub group: ControlSetKind,
    pub geometry: ResolvedGeometry,
    /// Shutter delay the reference was taken with
    pub delay_ms: f64,
    pub exposure_s: f64,
    /// Treat any match as stale
    pub force_refresh: bool,
}

impl ReferenceQuery {
    pub fn dark(camera: CameraId, geometry: ResolvedGeometry, exposure_s: f64) -> Self {
        Self {
            kind: ReferenceKind::Dark,
            camera,
            group: ControlSetKind::default(),
            geometry,
            delay_ms: 0.0,
            exposure_s,
            force_refresh: false,
        }
    }

    pub fn gain(camera: CameraId, geometry: ResolvedGeometry) -> Self {
        Self {
            kind: ReferenceKind::Gain,
            camera,
            group: ControlSetKind::default(),
            geometry,
            delay_ms: 0.0,
            exposure_s: 0.0,
            force_refresh: false,
        }
    }

    pub fn with_group(mut self, group: ControlSetKind) -> Self {
        self.group = group;
        self
    }

    pub fn with_delay(mut self, delay_ms: f64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Same query at another exposure
    pub(crate) fn at_exposure(&self, exposure_s: f64) -> Self {
        Self {
            exposure_s,
            ..self.clone()
        }
    }
}

/// One cached dark or gain reference
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub kind: ReferenceKind,
    pub camera: CameraId,
    pub group: ControlSetKind,
    pub binning: Binning,
    pub roi: Roi,
    pub delay_ms: f64,
    /// Exposure of dark references, 0 for gain
    pub exposure_s: f64,
    /// `None` while the entry is a placeholder awaiting its first acquisition
    pub buffer: Option<Arc<ImageBuffer>>,
    /// Cache use counter value at the last access
    pub use_count: u64,
    pub last_used: Instant,
    pub created: Instant,
    pub ownership: Ownership,
    /// Gain entry already reduced to scaled 16-bit
    pub compacted: bool,
    /// Accesses since the buffer was last replaced
    pub uses_since_commit: u32,
}

impl ReferenceEntry {
    pub(crate) fn placeholder(query: &ReferenceQuery, now: Instant) -> Self {
        Self {
            kind: query.kind,
            camera: query.camera,
            group: query.group,
            binning: query.geometry.binning,
            roi: query.geometry.roi,
            delay_ms: query.delay_ms,
            exposure_s: query.exposure_s,
            buffer: None,
            use_count: 0,
            last_used: now,
            created: now,
            ownership: Ownership::Owned,
            compacted: false,
            uses_since_commit: 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.buffer.is_none()
    }

    /// Resident bytes of the pixel buffer
    pub fn byte_len(&self) -> usize {
        self.buffer.as_ref().map(|b| b.byte_len()).unwrap_or(0)
    }

    pub fn byte_depth(&self) -> usize {
        self.buffer.as_ref().map(|b| b.byte_depth()).unwrap_or(0)
    }

    /// Geometry and delay match; exposure is compared by the caller
    pub(crate) fn matches_shape(&self, query: &ReferenceQuery, delay_tolerance_ms: f64) -> bool {
        self.kind == query.kind
            && self.camera == query.camera
            && self.binning == query.geometry.binning
            && self.roi == query.geometry.roi
            && (self.delay_ms - query.delay_ms).abs() <= delay_tolerance_ms
    }
}
