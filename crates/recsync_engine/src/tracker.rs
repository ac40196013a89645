//! Change tracking: the journal of locally changed record ids.

use crate::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Journal of locally changed ids with their local change time in seconds.
pub trait Tracker: Send + Sync {
    /// Returns all changed ids.
    fn changed_ids(&self) -> BTreeMap<String, f64>;

    /// Records a change to `id` at `when`. An existing later timestamp is kept.
    ///
    /// Returns true if the journal changed.
    fn add_changed_id(&self, id: &str, when: f64) -> bool;

    /// Forgets a change to `id`.
    fn remove_changed_id(&self, id: &str) -> bool;

    /// Forgets all changes.
    fn clear_changed_ids(&self);

    /// Returns the sync priority score.
    fn score(&self) -> u32;

    /// Raises the sync priority score.
    fn add_score(&self, amount: u32);

    /// Resets the sync priority score.
    fn reset_score(&self);

    /// Returns whether store observations are currently ignored.
    fn ignore_all(&self) -> bool;

    /// Starts or stops ignoring store observations.
    fn set_ignore_all(&self, ignore: bool);
}

/// An in-memory tracker.
///
/// Hosts feed it through [`MemoryTracker::observe`] when the local store
/// changes; those observations are dropped while `ignore_all` is set.
pub struct MemoryTracker {
    changed: RwLock<BTreeMap<String, f64>>,
    score: AtomicU32,
    ignore_all: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryTracker {
    /// Creates a tracker timestamping observations with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a tracker timestamping observations with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            changed: RwLock::new(BTreeMap::new()),
            score: AtomicU32::new(0),
            ignore_all: AtomicBool::new(false),
            clock,
        }
    }

    /// Notes a local store change to `id`, unless observations are ignored.
    pub fn observe(&self, id: &str) -> bool {
        if self.ignore_all() {
            trace!(id, "Ignoring change while applying incoming records");
            return false;
        }
        self.add_changed_id(id, self.clock.now())
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker for MemoryTracker {
    fn changed_ids(&self) -> BTreeMap<String, f64> {
        self.changed.read().clone()
    }

    fn add_changed_id(&self, id: &str, when: f64) -> bool {
        let mut changed = self.changed.write();
        match changed.get(id) {
            Some(existing) if *existing >= when => false,
            _ => {
                trace!(id, when, "Adding changed ID");
                changed.insert(id.to_string(), when);
                true
            }
        }
    }

    fn remove_changed_id(&self, id: &str) -> bool {
        self.changed.write().remove(id).is_some()
    }

    fn clear_changed_ids(&self) {
        self.changed.write().clear();
    }

    fn score(&self) -> u32 {
        self.score.load(Ordering::SeqCst)
    }

    fn add_score(&self, amount: u32) {
        self.score.fetch_add(amount, Ordering::SeqCst);
    }

    fn reset_score(&self) {
        self.score.store(0, Ordering::SeqCst);
    }

    fn ignore_all(&self) -> bool {
        self.ignore_all.load(Ordering::SeqCst)
    }

    fn set_ignore_all(&self, ignore: bool) {
        self.ignore_all.store(ignore, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn later_timestamp_wins() {
        let tracker = MemoryTracker::new();
        assert!(tracker.add_changed_id("a", 10.0));
        assert!(!tracker.add_changed_id("a", 5.0));
        assert!(tracker.add_changed_id("a", 20.0));
        assert_eq!(tracker.changed_ids()["a"], 20.0);
    }

    #[test]
    fn observations_respect_ignore_all() {
        let clock = Arc::new(ManualClock::new(500.0));
        let tracker = MemoryTracker::with_clock(clock);

        tracker.set_ignore_all(true);
        assert!(!tracker.observe("applied"));
        tracker.set_ignore_all(false);
        assert!(tracker.observe("edited"));

        let changed = tracker.changed_ids();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["edited"], 500.0);
    }

    #[test]
    fn score_accumulates_and_resets() {
        let tracker = MemoryTracker::new();
        tracker.add_score(300);
        tracker.add_score(5);
        assert_eq!(tracker.score(), 305);
        tracker.reset_score();
        assert_eq!(tracker.score(), 0);
    }
}
