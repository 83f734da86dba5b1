//! Change event coalescing.
//!
//! Raw notification events arrive far faster than they are worth
//! persisting; an editor save can emit a dozen events for one file.
//! The buffer keeps one pending event per relative path, the latest
//! observation winning, and is drained when the quiet timer fires.

use std::collections::HashMap;

/// What happened to a path, after coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Created or modified; the path is expected to exist on disk.
    Changed,
    /// Removed; the path is expected to be gone from disk.
    Removed,
}

/// One coalesced change, keyed by project-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub rel_path: String,
    pub kind: WatchEventKind,
}

/// Buffer of pending events, one per path.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: HashMap<String, WatchEventKind>,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation, replacing any earlier one for the path.
    ///
    /// The latest event wins: a remove followed by a re-create within
    /// one quiet window collapses to a single change.
    pub fn push(&mut self, rel_path: String, kind: WatchEventKind) {
        self.events.insert(rel_path, kind);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take all pending events, leaving the buffer empty.
    ///
    /// Removals are ordered after changes so a rename observed as
    /// create-new-then-remove-old never deletes the fresh node's
    /// ancestors out from under it.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        let mut out: Vec<WatchEvent> = self
            .events
            .drain()
            .map(|(rel_path, kind)| WatchEvent { rel_path, kind })
            .collect();
        out.sort_by_key(|e| (e.kind == WatchEventKind::Removed, e.rel_path.clone()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_writes_coalesce_to_one_event() {
        let mut buffer = EventBuffer::new();
        for _ in 0..5 {
            buffer.push("src/Foo.cs".to_string(), WatchEventKind::Changed);
        }

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, WatchEventKind::Changed);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_latest_event_wins() {
        let mut buffer = EventBuffer::new();
        buffer.push("a.cs".to_string(), WatchEventKind::Changed);
        buffer.push("a.cs".to_string(), WatchEventKind::Removed);

        assert_eq!(buffer.drain()[0].kind, WatchEventKind::Removed);

        buffer.push("b.cs".to_string(), WatchEventKind::Removed);
        buffer.push("b.cs".to_string(), WatchEventKind::Changed);

        assert_eq!(buffer.drain()[0].kind, WatchEventKind::Changed);
    }

    #[test]
    fn test_drain_orders_removals_last() {
        let mut buffer = EventBuffer::new();
        buffer.push("old/Gone.cs".to_string(), WatchEventKind::Removed);
        buffer.push("new/Here.cs".to_string(), WatchEventKind::Changed);

        let drained = buffer.drain();
        assert_eq!(drained[0].kind, WatchEventKind::Changed);
        assert_eq!(drained[1].kind, WatchEventKind::Removed);
    }
}
