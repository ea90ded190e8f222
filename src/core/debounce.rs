use std::collections::HashMap;
use crate::core::types::BoundingBox;

/// Counter value after a save. The box has to be seen this many extra
/// times (or leave and come back) before it can trigger again.
pub const SAVED_SENTINEL: i32 = -1000;

/// Consecutive-sighting counters for unmatched faces, keyed by the exact box.
///
/// A one-pixel move produces a new key and a fresh counter.
#[derive(Debug, Default)]
pub struct UnknownDebounce {
    counters: HashMap<BoundingBox, i32>,
}

impl UnknownDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter for `key` (new keys start at zero) and returns it.
    pub fn observe(&mut self, key: BoundingBox) -> i32 {
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    pub fn reached(count: i32, threshold: u32) -> bool {
        i64::from(count) >= i64::from(threshold)
    }

    pub fn suppress(&mut self, key: BoundingBox) {
        self.counters.insert(key, SAVED_SENTINEL);
    }

    pub fn count(&self, key: &BoundingBox) -> Option<i32> {
        self.counters.get(key).copied()
    }

    /// Drops every counter once more than `capacity` keys are held.
    pub fn clear_if_over(&mut self, capacity: usize) -> bool {
        if self.counters.len() > capacity {
            self.counters.clear();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
