//! # Reference Cache
//!
//! Keyed store of dark and gain reference images.
//!
//! Responsibilities:
//! - Exact lookup by kind, camera, binning, ROI, shutter delay and exposure
//! - Bracketing dark references for interpolation
//! - Staleness and forced refresh
//! - Memory-bounded LRU eviction with a per (camera, control-set kind) dark cap
//! - Lossy compaction of gain references under memory pressure
//!
//! ## Usage
//!
//! ```ignore
//! let mut cache = ReferenceCache::new(CacheConfig::default());
//! let lookup = cache.get_or_create(&ReferenceQuery::gain(camera, geometry));
//! if let CacheLookup::Exact { id, needs_refresh: true } = lookup {
//!     cache.commit(id, acquired_gain)?;
//! }
//! ```

mod cache;
mod compaction;
mod entry;
mod error;
mod interpolation;

pub use cache::{BracketSlot, CacheLookup, CacheStats, ReferenceCache};
pub use compaction::compact_f32;
pub use entry::{EntryId, Ownership, ReferenceEntry, ReferenceQuery};
pub use error::{CacheError, Result};
pub use interpolation::{bracket_exposures, interpolate_dark};
