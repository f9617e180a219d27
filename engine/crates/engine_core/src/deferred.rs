use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Items scheduled to become due at a point in time.
///
/// Items due at the same instant come back in scheduling order. The queue
/// never runs anything itself; the owner drains due items from its loop and
/// re-checks whatever state they refer to.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    entries: BTreeMap<(Instant, u64), T>,
    next_seq: u64,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((due, seq), item);
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, item: T) {
        self.schedule_at(now + delay, item);
    }

    /// Remove and return every item due at or before `now`.
    pub fn drain_due(&mut self, now: Instant) -> Vec<T> {
        let pending = self.entries.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.entries, pending);
        due.into_values().collect()
    }

    /// Drop every pending item matching the predicate. Returns how many were
    /// dropped.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, item| !pred(item));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
