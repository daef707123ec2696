//! Last-known-position cache.
//!
//! One entry per tag, last write wins. The owning provider wraps this in
//! `Arc<RwLock<..>>`: the pump or generator task is the only writer,
//! `get_all` serves synchronous snapshots to any thread.

use std::collections::HashMap;

use crate::types::TagPosition;

/// Battery percentage assumed for a tag that has never reported one.
pub const DEFAULT_BATTERY_LEVEL: u8 = 100;

/// In-memory map of the latest [`TagPosition`] per tag.
#[derive(Debug, Default)]
pub struct PositionCache {
    positions: HashMap<String, TagPosition>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry wholesale.
    pub fn upsert(&mut self, position: TagPosition) {
        self.positions.insert(position.tag_id.clone(), position);
    }

    /// Insert a position while keeping the battery level already on file.
    ///
    /// Position frames carry no battery data; the level survives from the
    /// last battery reading, or starts at [`DEFAULT_BATTERY_LEVEL`].
    /// Returns the merged entry as stored.
    pub fn merge_position(&mut self, mut position: TagPosition) -> TagPosition {
        if let Some(previous) = self.positions.get(&position.tag_id) {
            position.battery_level = previous.battery_level;
        }
        self.positions
            .insert(position.tag_id.clone(), position.clone());
        position
    }

    /// Apply a battery reading to an existing entry.
    ///
    /// A reading for an unknown tag updates nothing; the battery event is
    /// still delivered to listeners, so nothing is lost.
    pub fn apply_battery(&mut self, tag_id: &str, level: u8, timestamp_ms: u64) -> bool {
        match self.positions.get_mut(tag_id) {
            Some(entry) => {
                entry.battery_level = level;
                entry.timestamp_ms = timestamp_ms;
                true
            }
            None => false,
        }
    }

    /// Drop entries for unsubscribed tags.
    pub fn remove_many(&mut self, tag_ids: &[String]) {
        for id in tag_ids {
            self.positions.remove(id);
        }
    }

    pub fn get(&self, tag_id: &str) -> Option<TagPosition> {
        self.positions.get(tag_id).cloned()
    }

    /// Snapshot of every entry. No ordering guarantees.
    pub fn get_all(&self) -> Vec<TagPosition> {
        self.positions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(tag_id: &str, x: f64, battery: u8, ts: u64) -> TagPosition {
        TagPosition {
            tag_id: tag_id.into(),
            x,
            y: 0.0,
            z: 0.0,
            map_id: "1".into(),
            timestamp_ms: ts,
            battery_level: battery,
        }
    }

    #[test]
    fn last_write_wins() {
        let mut cache = PositionCache::new();
        cache.upsert(position("a", 1.0, 90, 10));
        cache.upsert(position("a", 2.0, 90, 20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().x, 2.0);
        assert_eq!(cache.get("a").unwrap().timestamp_ms, 20);
    }

    #[test]
    fn merge_keeps_known_battery_level() {
        let mut cache = PositionCache::new();
        let merged = cache.merge_position(position("a", 1.0, DEFAULT_BATTERY_LEVEL, 10));
        assert_eq!(merged.battery_level, DEFAULT_BATTERY_LEVEL);

        assert!(cache.apply_battery("a", 55, 20));
        let merged = cache.merge_position(position("a", 2.0, DEFAULT_BATTERY_LEVEL, 30));
        assert_eq!(merged.battery_level, 55);
        assert_eq!(cache.get("a").unwrap().battery_level, 55);
    }

    #[test]
    fn battery_for_unknown_tag_updates_nothing() {
        let mut cache = PositionCache::new();
        assert!(!cache.apply_battery("ghost", 10, 5));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_many_evicts_only_named_tags() {
        let mut cache = PositionCache::new();
        cache.upsert(position("a", 1.0, 90, 10));
        cache.upsert(position("b", 1.0, 90, 10));
        cache.remove_many(&["a".into(), "zz".into()]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn snapshot_is_detached() {
        let mut cache = PositionCache::new();
        cache.upsert(position("a", 1.0, 90, 10));
        let snapshot = cache.get_all();
        cache.upsert(position("a", 9.0, 90, 20));
        assert_eq!(snapshot[0].x, 1.0);
    }
}
