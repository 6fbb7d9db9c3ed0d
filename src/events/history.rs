use std::collections::VecDeque;

use serde::Serialize;

use crate::core::types::{EntityId, Tick};

/// Metadata of one delivered event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub kind: &'static str,
    pub source: Option<EntityId>,
    pub tick: Tick,
    /// Handlers that received it
    pub handlers: usize,
}

/// Ring buffer of recently delivered events
#[derive(Debug, Clone)]
pub struct EventHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front(); // Remove oldest
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Most recent event of a kind within `within_ticks` of the newest entry
    pub fn find_recent(&self, kind: &str, within_ticks: Tick) -> Option<&HistoryEntry> {
        let min_tick = self
            .entries
            .back()
            .map(|e| e.tick.saturating_sub(within_ticks))
            .unwrap_or(0);

        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.tick >= min_tick)
    }

    pub fn by_source(&self, source: EntityId) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(move |e| e.source == Some(source))
    }

    /// Drop entries older than `tick`
    pub fn clear_before(&mut self, tick: Tick) {
        self.entries.retain(|e| e.tick >= tick);
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &'static str, source: Option<u64>, tick: Tick) -> HistoryEntry {
        HistoryEntry {
            kind,
            source: source.map(EntityId),
            tick,
            handlers: 1,
        }
    }

    #[test]
    fn test_history_ring() {
        let mut history = EventHistory::new(3);
        history.push(entry("a", None, 1));
        history.push(entry("b", None, 2));
        history.push(entry("c", None, 3));
        assert_eq!(history.len(), 3);

        // Fourth push evicts the oldest
        history.push(entry("d", None, 4));
        assert_eq!(history.len(), 3);
        assert_eq!(history.entries().next().unwrap().tick, 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = EventHistory::new(0);
        history.push(entry("a", None, 1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_find_recent_respects_tick_range() {
        let mut history = EventHistory::new(10);
        history.push(entry("fed", Some(1), 10));
        history.push(entry("moved", Some(1), 100));

        // Newest is 100, so the window [50, 100] excludes tick 10
        assert!(history.find_recent("fed", 50).is_none());
        assert!(history.find_recent("fed", 100).is_some());
        assert!(history.find_recent("slept", 100).is_none());
    }

    #[test]
    fn test_by_source() {
        let mut history = EventHistory::new(10);
        history.push(entry("a", Some(1), 1));
        history.push(entry("b", Some(2), 2));
        history.push(entry("c", Some(1), 3));
        history.push(entry("d", None, 4));

        let from_one: Vec<_> = history.by_source(EntityId(1)).collect();
        assert_eq!(from_one.len(), 2);
        assert!(from_one.iter().all(|e| e.source == Some(EntityId(1))));
    }

    #[test]
    fn test_clear_before() {
        let mut history = EventHistory::new(10);
        history.push(entry("a", None, 10));
        history.push(entry("b", None, 20));
        history.push(entry("c", None, 30));

        history.clear_before(25);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries().next().unwrap().kind, "c");
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(EventHistory::default().capacity(), 64);
    }
}
