//! Keyed reference store with bounded memory.
//!
//! Entries live in a `Slab` and are addressed by their slab key. Lookups
//! never allocate pixel memory: a miss inserts a placeholder the caller fills
//! through [`ReferenceCache::commit`] once the reference has been acquired.
//! Bounds are enforced on every fill by evicting, never by refusing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use contracts::{
    CacheConfig, CameraId, ControlSetKind, ImageBuffer, ReferenceKind,
};
use slab::Slab;
use tracing::{debug, instrument, warn};

use crate::compaction::compact_f32;
use crate::entry::{EntryId, Ownership, ReferenceEntry, ReferenceQuery};
use crate::interpolation::bracket_exposures;
use crate::{CacheError, Result};

/// One side of an interpolation bracket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketSlot {
    pub id: EntryId,
    pub exposure_s: f64,
    pub needs_refresh: bool,
}

/// Result of [`ReferenceCache::get_or_create`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheLookup {
    /// Single matching entry
    Exact { id: EntryId, needs_refresh: bool },
    /// Two dark entries enclosing the requested exposure
    Bracketed {
        lower: BracketSlot,
        upper: BracketSlot,
    },
}

impl CacheLookup {
    /// Whether any referenced entry must be (re)acquired
    pub fn needs_refresh(&self) -> bool {
        match self {
            CacheLookup::Exact { needs_refresh, .. } => *needs_refresh,
            CacheLookup::Bracketed { lower, upper } => lower.needs_refresh || upper.needs_refresh,
        }
    }

    /// Entry ids with the exposure each one is for
    pub fn slots(&self, requested_exposure_s: f64) -> Vec<BracketSlot> {
        match *self {
            CacheLookup::Exact { id, needs_refresh } => vec![BracketSlot {
                id,
                exposure_s: requested_exposure_s,
                needs_refresh,
            }],
            CacheLookup::Bracketed { lower, upper } => vec![lower, upper],
        }
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub placeholders: usize,
    pub resident_bytes: usize,
    pub evictions: u64,
    pub use_counter: u64,
}

/// Dark / gain reference cache
pub struct ReferenceCache {
    config: CacheConfig,
    entries: Slab<ReferenceEntry>,
    /// Incremented on every access, stamped onto the accessed entry
    use_counter: u64,
    resident_bytes: usize,
    evictions: u64,
}

impl fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("entries", &self.entries.len())
            .field("resident_bytes", &self.resident_bytes)
            .field("max_resident_bytes", &self.config.max_resident_bytes)
            .field("evictions", &self.evictions)
            .finish()
    }
}

impl ReferenceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Slab::new(),
            use_counter: 0,
            resident_bytes: 0,
            evictions: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn use_counter(&self) -> u64 {
        self.use_counter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            placeholders: self.entries.iter().filter(|(_, e)| e.is_placeholder()).count(),
            resident_bytes: self.resident_bytes,
            evictions: self.evictions,
            use_counter: self.use_counter,
        }
    }

    /// Entry metadata without counting as a use
    pub fn peek(&self, id: EntryId) -> Option<&ReferenceEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &ReferenceEntry)> {
        self.entries.iter()
    }

    /// Find or create the entries serving a query
    pub fn get_or_create(&mut self, query: &ReferenceQuery) -> CacheLookup {
        self.get_or_create_at(query, Instant::now())
    }

    #[instrument(
        name = "reference_lookup",
        skip(self, query),
        fields(kind = query.kind.as_str(), camera = query.camera, exposure_s = query.exposure_s)
    )]
    pub fn get_or_create_at(&mut self, query: &ReferenceQuery, now: Instant) -> CacheLookup {
        if query.kind == ReferenceKind::Dark && self.find_exact(query).is_none() {
            if let Some(lookup) = self.bracket(query, now) {
                return lookup;
            }
        }

        let (id, needs_refresh) = self.exact_slot(query, now);
        debug!(id, needs_refresh, "exact reference");
        CacheLookup::Exact { id, needs_refresh }
    }

    /// Current buffer of an entry, counted as a use
    ///
    /// Gain references are compacted after their first use when the cache is
    /// under memory pressure; the caller still receives the buffer it asked for.
    pub fn get(&mut self, id: EntryId) -> Option<Arc<ImageBuffer>> {
        let now = Instant::now();
        let buffer = self.entries.get(id)?.buffer.clone()?;
        self.touch(id, now);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.uses_since_commit = entry.uses_since_commit.saturating_add(1);
        }
        self.maybe_compact(id);
        Some(buffer)
    }

    /// Fill or refresh an entry returned by a lookup
    pub fn commit(&mut self, id: EntryId, image: ImageBuffer) -> Result<()> {
        self.commit_all(vec![(id, image)])
    }

    /// Fill several entries, then enforce bounds once, protecting all of them
    pub fn commit_all(&mut self, items: Vec<(EntryId, ImageBuffer)>) -> Result<()> {
        self.commit_all_protecting(items, &[])
    }

    /// Like [`commit_all`](Self::commit_all), but `pinned` entries also survive
    /// the bound pass. A session pins the references it has already resolved
    /// so filling the rest cannot evict them before they are read.
    #[instrument(
        name = "reference_commit",
        skip(self, items, pinned),
        fields(count = items.len(), pinned = pinned.len())
    )]
    pub fn commit_all_protecting(
        &mut self,
        items: Vec<(EntryId, ImageBuffer)>,
        pinned: &[EntryId],
    ) -> Result<()> {
        let now = Instant::now();
        let mut protect = Vec::with_capacity(items.len() + pinned.len());
        protect.extend_from_slice(pinned);
        for (id, image) in items {
            self.fill(id, image, now)?;
            protect.push(id);
        }
        self.enforce_bounds(&protect);
        Ok(())
    }

    /// Re-apply the bounds with nothing protected
    pub fn trim(&mut self) {
        self.enforce_bounds(&[]);
    }

    /// Insert a cache-owned reference directly
    pub fn add_ref(&mut self, query: &ReferenceQuery, image: ImageBuffer) -> Result<EntryId> {
        self.insert_filled(query, image, Ownership::Owned, Instant::now())
    }

    /// Insert an externally supplied reference
    ///
    /// External references are never compacted or invalidated.
    pub fn add_external(&mut self, query: &ReferenceQuery, image: ImageBuffer) -> Result<EntryId> {
        self.insert_filled(query, image, Ownership::External, Instant::now())
    }

    /// Drop an entry, typically a placeholder whose acquisition failed
    pub fn discard(&mut self, id: EntryId) -> bool {
        if !self.entries.contains(id) {
            return false;
        }
        self.remove(id);
        self.publish_bytes();
        true
    }

    /// Discard a camera's cache-owned references, e.g. after a divide-by-2 change
    #[instrument(name = "reference_invalidate", skip(self))]
    pub fn invalidate(&mut self, camera: CameraId, reason: &str) -> usize {
        let victims: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.camera == camera && e.ownership == Ownership::Owned)
            .map(|(id, _)| id)
            .collect();
        for &id in &victims {
            self.remove(id);
        }
        if !victims.is_empty() {
            self.evictions += victims.len() as u64;
            metrics::counter!("camctl_reference_evictions_total", "reason" => "invalidated")
                .increment(victims.len() as u64);
        }
        self.publish_bytes();
        debug!(removed = victims.len(), "invalidated references");
        victims.len()
    }

    /// Release everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.resident_bytes = 0;
        self.publish_bytes();
    }
}

impl ReferenceCache {
    fn max_age_s(&self, kind: ReferenceKind) -> f64 {
        match kind {
            ReferenceKind::Dark => self.config.dark_max_age_s,
            ReferenceKind::Gain => self.config.gain_max_age_s,
        }
    }

    fn touch(&mut self, id: EntryId, now: Instant) {
        self.use_counter += 1;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.use_count = self.use_counter;
            entry.last_used = now;
        }
    }

    fn needs_refresh(&self, id: EntryId, force: bool, now: Instant) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return true;
        };
        if entry.is_placeholder() || force {
            return true;
        }
        if entry.ownership == Ownership::External {
            return false;
        }
        now.saturating_duration_since(entry.created).as_secs_f64() > self.max_age_s(entry.kind)
    }

    fn exposure_matches(&self, entry: &ReferenceEntry, exposure_s: f64) -> bool {
        entry.kind == ReferenceKind::Gain
            || (entry.exposure_s - exposure_s).abs() <= self.config.exposure_tolerance_s
    }

    /// Best exact match: filled entries first, then most recently used
    fn find_exact(&self, query: &ReferenceQuery) -> Option<EntryId> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.matches_shape(query, self.config.delay_tolerance_ms)
                    && self.exposure_matches(e, query.exposure_s)
            })
            .max_by_key(|(_, e)| (!e.is_placeholder(), e.use_count))
            .map(|(id, _)| id)
    }

    fn exact_slot(&mut self, query: &ReferenceQuery, now: Instant) -> (EntryId, bool) {
        let id = match self.find_exact(query) {
            Some(id) => id,
            None => self.entries.insert(ReferenceEntry::placeholder(query, now)),
        };
        let needs_refresh = self.needs_refresh(id, query.force_refresh, now);
        self.touch(id, now);
        (id, needs_refresh)
    }

    /// Nearest existing dark strictly below / above within one interval
    fn nearest_dark(&self, query: &ReferenceQuery, below: bool, interval_s: f64, min_s: f64) -> Option<(EntryId, f64)> {
        let tol = self.config.exposure_tolerance_s;
        self.entries
            .iter()
            .filter(|(_, e)| e.matches_shape(query, self.config.delay_tolerance_ms))
            .filter(|(_, e)| {
                let diff = e.exposure_s - query.exposure_s;
                if below {
                    diff < -tol && -diff <= interval_s && e.exposure_s >= min_s
                } else {
                    diff > tol && diff <= interval_s
                }
            })
            .min_by(|(_, a), (_, b)| {
                let da = (a.exposure_s - query.exposure_s).abs();
                let db = (b.exposure_s - query.exposure_s).abs();
                da.total_cmp(&db)
            })
            .map(|(id, e)| (id, e.exposure_s))
    }

    fn bracket(&mut self, query: &ReferenceQuery, now: Instant) -> Option<CacheLookup> {
        let interp = self.config.interpolation.clone()?;
        let (grid_lower, grid_upper) = bracket_exposures(
            query.exposure_s,
            interp.interval_s,
            interp.min_exposure_s,
            self.config.exposure_tolerance_s,
        )?;

        let lower = self.bracket_slot(query, true, grid_lower, &interp, now);
        let upper = self.bracket_slot(query, false, grid_upper, &interp, now);
        debug!(
            lower = lower.exposure_s,
            upper = upper.exposure_s,
            refresh = lower.needs_refresh || upper.needs_refresh,
            "bracketed dark reference"
        );
        Some(CacheLookup::Bracketed { lower, upper })
    }

    fn bracket_slot(
        &mut self,
        query: &ReferenceQuery,
        below: bool,
        grid_exposure: f64,
        interp: &contracts::DarkInterpolationConfig,
        now: Instant,
    ) -> BracketSlot {
        match self.nearest_dark(query, below, interp.interval_s, interp.min_exposure_s) {
            Some((id, exposure_s)) => {
                let needs_refresh = self.needs_refresh(id, query.force_refresh, now);
                self.touch(id, now);
                BracketSlot {
                    id,
                    exposure_s,
                    needs_refresh,
                }
            }
            None => {
                let (id, needs_refresh) = self.exact_slot(&query.at_exposure(grid_exposure), now);
                BracketSlot {
                    id,
                    exposure_s: grid_exposure,
                    needs_refresh,
                }
            }
        }
    }

    fn fill(&mut self, id: EntryId, image: ImageBuffer, now: Instant) -> Result<()> {
        let bytes = image.byte_len();
        if bytes > self.config.max_resident_bytes {
            return Err(CacheError::TooLarge {
                bytes,
                bound: self.config.max_resident_bytes,
            });
        }
        let entry = self.entries.get_mut(id).ok_or(CacheError::UnknownEntry(id))?;
        let old = entry.byte_len();
        entry.buffer = Some(Arc::new(image));
        entry.created = now;
        entry.compacted = false;
        entry.uses_since_commit = 0;
        self.resident_bytes = self.resident_bytes - old + bytes;
        self.touch(id, now);
        Ok(())
    }

    fn insert_filled(
        &mut self,
        query: &ReferenceQuery,
        image: ImageBuffer,
        ownership: Ownership,
        now: Instant,
    ) -> Result<EntryId> {
        let existing = self
            .find_exact(query)
            .filter(|&id| self.entries.get(id).map(|e| e.ownership) == Some(ownership));
        let id = match existing {
            Some(id) => id,
            None => {
                let mut entry = ReferenceEntry::placeholder(query, now);
                entry.ownership = ownership;
                self.entries.insert(entry)
            }
        };
        if let Err(err) = self.fill(id, image, now) {
            if existing.is_none() {
                self.entries.remove(id);
            }
            return Err(err);
        }
        self.enforce_bounds(&[id]);
        Ok(id)
    }

    fn remove(&mut self, id: EntryId) {
        let entry = self.entries.remove(id);
        self.resident_bytes -= entry.byte_len();
    }

    fn evict(&mut self, id: EntryId, reason: &'static str) {
        if let Some(entry) = self.entries.get(id) {
            debug!(
                id,
                kind = entry.kind.as_str(),
                camera = entry.camera,
                bytes = entry.byte_len(),
                reason,
                "evicting reference"
            );
        }
        self.remove(id);
        self.evictions += 1;
        metrics::counter!("camctl_reference_evictions_total", "reason" => reason).increment(1);
    }

    /// Per-group dark cap first, then the global memory bound
    fn enforce_bounds(&mut self, protect: &[EntryId]) {
        let cap = self.config.max_darks_per_group;
        let mut groups: HashMap<(CameraId, ControlSetKind), Vec<(u64, EntryId)>> = HashMap::new();
        for (id, entry) in self.entries.iter() {
            if entry.kind == ReferenceKind::Dark && !entry.is_placeholder() {
                groups
                    .entry((entry.camera, entry.group))
                    .or_default()
                    .push((entry.use_count, id));
            }
        }
        for (_, mut members) in groups {
            if members.len() <= cap {
                continue;
            }
            members.sort_unstable();
            let mut excess = members.len() - cap;
            for (_, id) in members {
                if excess == 0 {
                    break;
                }
                if protect.contains(&id) {
                    continue;
                }
                self.evict(id, "group_cap");
                excess -= 1;
            }
        }

        let bound = self.config.max_resident_bytes;
        if self.resident_bytes > bound {
            warn!(
                resident = self.resident_bytes,
                bound, "reference cache over memory bound, evicting"
            );
        }
        while self.resident_bytes > bound {
            let victim = self
                .entries
                .iter()
                .filter(|(id, e)| !e.is_placeholder() && !protect.contains(id))
                // external entries go first, owned ones only once those run out
                .min_by_key(|(_, e)| (e.ownership != Ownership::External, e.use_count))
                .map(|(id, _)| id);
            match victim {
                Some(id) => self.evict(id, "memory"),
                None => break,
            }
        }
        self.publish_bytes();
    }

    fn under_pressure(&self) -> bool {
        let gc = &self.config.gain_compaction;
        gc.enabled
            && self.resident_bytes as f64 > gc.pressure_fraction * self.config.max_resident_bytes as f64
    }

    fn maybe_compact(&mut self, id: EntryId) {
        if !self.under_pressure() {
            return;
        }
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        if entry.kind != ReferenceKind::Gain
            || entry.ownership != Ownership::Owned
            || entry.compacted
            || entry.uses_since_commit == 0
        {
            return;
        }
        let Some(compacted) = entry.buffer.as_deref().and_then(compact_f32) else {
            return;
        };
        let new_bytes = compacted.byte_len();
        if let Some(entry) = self.entries.get_mut(id) {
            let old = entry.byte_len();
            entry.buffer = Some(Arc::new(compacted));
            entry.compacted = true;
            self.resident_bytes = self.resident_bytes - old + new_bytes;
            debug!(id, old, new_bytes, "compacted gain reference");
        }
        self.publish_bytes();
    }

    fn publish_bytes(&self) {
        metrics::gauge!("camctl_reference_cache_bytes").set(self.resident_bytes as f64);
    }
}
