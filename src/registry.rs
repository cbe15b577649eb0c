//! Concurrent first-seen registry
//!
//! A registry maps a call path identity to the number of times it has been
//! observed. Its single mutating operation, [`Registry::observe`], bumps the
//! visit count and reports whether this was the first visit. For any set of
//! concurrent observations of the same key exactly one returns `true`, and
//! the stored count equals the number of observations.
//!
//! Two storage variants are provided. They use different identity keys and
//! are not interchangeable:
//!
//! - [`PathRegistry`]: unbounded, keyed by the fingerprint of the whole
//!   captured stack. This is the default used by the detector.
//! - [`CallerSlots`]: fixed capacity ([`CP_MAX_SLOTS`] by default), keyed
//!   by a single return address: the call site that reached the
//!   instrumented function. Once every slot is taken, new keys are
//!   reported as already seen.
//!
//! Both variants grow only; entries are never evicted.
//!
//! # Locking
//!
//! Each variant has an optimistic fast path that may only ever answer
//! `false` (key definitely present). Anything else falls through to an
//! exclusive lock, which is the sole authority for answering `true`.

use crate::error::{CallPathError, Result};
use crate::frame_capture::CallFrame;
use crate::path_hash::{hash_path, Fingerprint};
use crossbeam::sync::ShardedLock;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Number of slots in a default [`CallerSlots`] registry
pub const CP_MAX_SLOTS: usize = 100;

/// Visit count for one call path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub fingerprint: Fingerprint,
    /// Starts at 1 on first observation, never decreases
    pub visits: u64,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Distinct identities recorded
    pub distinct_paths: usize,
    /// Sum of all visit counts
    pub total_visits: u64,
    /// Observations answered without taking the exclusive lock
    pub fast_path_hits: u64,
    /// New identities rejected because the registry was full
    pub saturated: u64,
    /// Slot capacity, `None` for unbounded registries
    pub capacity: Option<usize>,
}

/// Store of observed call path identities
pub trait Registry: Send + Sync {
    /// Derive this registry's identity key from a captured call path
    /// (innermost frame first).
    ///
    /// # Errors
    ///
    /// [`CallPathError::EmptyCapture`] if `frames` is empty.
    fn identity(&self, frames: &[CallFrame]) -> Result<Fingerprint>;

    /// Record one visit of `fingerprint`; `true` iff this was the first.
    fn observe(&self, fingerprint: Fingerprint) -> bool;

    /// All records, sorted by fingerprint
    fn snapshot(&self) -> Vec<VisitRecord>;

    fn stats(&self) -> RegistryStats;
}

fn summarize(records: &[VisitRecord]) -> (usize, u64) {
    let total = records.iter().map(|r| r.visits).sum();
    (records.len(), total)
}

/// Unbounded registry keyed by full-stack fingerprints
///
/// Memory grows with the number of distinct paths actually observed.
#[derive(Debug, Default)]
pub struct PathRegistry {
    visits: ShardedLock<FnvHashMap<Fingerprint, AtomicU64>>,
    fast_path_hits: AtomicU64,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit count for a fingerprint, 0 if never observed
    pub fn visits(&self, fingerprint: Fingerprint) -> u64 {
        let visits = self.visits.read().unwrap_or_else(PoisonError::into_inner);
        visits
            .get(&fingerprint)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.visits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for PathRegistry {
    fn identity(&self, frames: &[CallFrame]) -> Result<Fingerprint> {
        hash_path(frames)
    }

    fn observe(&self, fingerprint: Fingerprint) -> bool {
        {
            let visits = self.visits.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = visits.get(&fingerprint) {
                count.fetch_add(1, Ordering::Relaxed);
                self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        let mut visits = self.visits.write().unwrap_or_else(PoisonError::into_inner);
        let count = visits.entry(fingerprint).or_default().get_mut();
        *count += 1;
        *count == 1
    }

    fn snapshot(&self) -> Vec<VisitRecord> {
        let visits = self.visits.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<VisitRecord> = visits
            .iter()
            .map(|(fingerprint, count)| VisitRecord {
                fingerprint: *fingerprint,
                visits: count.load(Ordering::Relaxed),
            })
            .collect();
        drop(visits);

        records.sort_by_key(|r| r.fingerprint);
        records
    }

    fn stats(&self) -> RegistryStats {
        let (distinct_paths, total_visits) = summarize(&self.snapshot());
        RegistryStats {
            distinct_paths,
            total_visits,
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            saturated: 0,
            capacity: None,
        }
    }
}

/// Fixed-capacity registry keyed by a single caller address
///
/// Slots are filled in order and never reused. A slot's key is written
/// before the published length is advanced (release), so any slot index
/// below the length read with acquire ordering holds its final key and can
/// be scanned without the lock.
#[derive(Debug)]
pub struct CallerSlots {
    keys: Box<[AtomicU64]>,
    visits: Box<[AtomicU64]>,
    published: AtomicUsize,
    insert_lock: Mutex<()>,
    fast_path_hits: AtomicU64,
    saturated: AtomicU64,
}

impl CallerSlots {
    /// Registry with [`CP_MAX_SLOTS`] slots
    pub fn new() -> Self {
        Self::with_capacity(CP_MAX_SLOTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            visits: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            published: AtomicUsize::new(0),
            insert_lock: Mutex::new(()),
            fast_path_hits: AtomicU64::new(0),
            saturated: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Slots in use
    pub fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn find(&self, key: u64, published: usize) -> Option<usize> {
        self.keys[..published]
            .iter()
            .position(|slot| slot.load(Ordering::Relaxed) == key)
    }
}

impl Default for CallerSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for CallerSlots {
    /// The return address one level above the instrumented function, i.e.
    /// the call site that reached it. Falls back to the innermost frame
    /// for single-frame paths.
    fn identity(&self, frames: &[CallFrame]) -> Result<Fingerprint> {
        frames
            .get(1)
            .or_else(|| frames.first())
            .map(|frame| Fingerprint(frame.ip))
            .ok_or(CallPathError::EmptyCapture)
    }

    fn observe(&self, fingerprint: Fingerprint) -> bool {
        let key = fingerprint.as_u64();

        if let Some(slot) = self.find(key, self.published.load(Ordering::Acquire)) {
            self.visits[slot].fetch_add(1, Ordering::Relaxed);
            self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let _guard = self
            .insert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let published = self.published.load(Ordering::Acquire);
        if let Some(slot) = self.find(key, published) {
            self.visits[slot].fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if published == self.capacity() {
            let rejected = self.saturated.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(
                key = %fingerprint,
                capacity = self.capacity(),
                rejected,
                "caller slots saturated; reporting new caller as seen"
            );
            return false;
        }

        self.keys[published].store(key, Ordering::Relaxed);
        self.visits[published].store(1, Ordering::Relaxed);
        self.published.store(published + 1, Ordering::Release);
        true
    }

    fn snapshot(&self) -> Vec<VisitRecord> {
        let published = self.published.load(Ordering::Acquire);
        let mut records: Vec<VisitRecord> = (0..published)
            .map(|slot| VisitRecord {
                fingerprint: Fingerprint(self.keys[slot].load(Ordering::Relaxed)),
                visits: self.visits[slot].load(Ordering::Relaxed),
            })
            .collect();
        records.sort_by_key(|r| r.fingerprint);
        records
    }

    fn stats(&self) -> RegistryStats {
        let (distinct_paths, total_visits) = summarize(&self.snapshot());
        RegistryStats {
            distinct_paths,
            total_visits,
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
            capacity: Some(self.capacity()),
        }
    }
}
