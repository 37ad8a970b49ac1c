//! Per-tree trailing-edge debouncing
//!
//! A burst of filesystem events for one tree yields a single signal once
//! the tree has been quiet for the debounce window.

use annexstat_core::TreeId;
use ahash::AHashMap;
use std::time::{Duration, Instant};

pub struct Debouncer {
    window: Duration,
    /// tree -> time its signal becomes due
    pending: AHashMap<TreeId, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: AHashMap::new(),
        }
    }

    /// Record an event, pushing the tree's deadline back
    pub fn record(&mut self, tree: TreeId, now: Instant) {
        self.pending.insert(tree, now + self.window);
    }

    /// Remove and return every tree whose deadline has passed
    pub fn take_due(&mut self, now: Instant) -> Vec<TreeId> {
        let due: Vec<TreeId> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(tree, _)| *tree)
            .collect();
        for tree in &due {
            self.pending.remove(tree);
        }
        due
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    pub fn forget(&mut self, tree: TreeId) {
        self.pending.remove(&tree);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_collapses_to_one() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let tree = TreeId::random();
        let start = Instant::now();

        debouncer.record(tree, start);
        debouncer.record(tree, start + Duration::from_millis(50));
        debouncer.record(tree, start + Duration::from_millis(90));

        // Still inside the window of the last event
        assert!(debouncer.take_due(start + Duration::from_millis(150)).is_empty());

        let due = debouncer.take_due(start + Duration::from_millis(190));
        assert_eq!(due, vec![tree]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_trees_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let a = TreeId::random();
        let b = TreeId::random();
        let start = Instant::now();

        debouncer.record(a, start);
        debouncer.record(b, start + Duration::from_millis(80));
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(100)));

        assert_eq!(debouncer.take_due(start + Duration::from_millis(100)), vec![a]);
        assert_eq!(debouncer.take_due(start + Duration::from_millis(180)), vec![b]);
    }

    #[test]
    fn test_forget() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        let tree = TreeId::random();
        let start = Instant::now();

        debouncer.record(tree, start);
        debouncer.forget(tree);
        assert!(debouncer.take_due(start + Duration::from_secs(1)).is_empty());
        assert_eq!(debouncer.next_deadline(), None);
    }
}
