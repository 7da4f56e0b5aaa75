//! Bounded FIFO mapping used to translate `SSH_MSG_UNIMPLEMENTED`
//! sequence numbers across the splice, per §3 and §8 invariants 1-2.

use std::collections::{HashMap, VecDeque};

/// Maximum number of entries retained per direction before the oldest
/// is evicted. `UNIMPLEMENTED` is only ever a meaningful reply to a
/// packet in the very recent past, so a small fixed-size cache is
/// sufficient.
pub const CAPACITY: usize = 100;

/// One direction's `this-side-send-seq -> peer-side-receive-seq`
/// mapping (§3). Insertion order is tracked so the oldest entry can be
/// evicted once [`CAPACITY`] is exceeded.
#[derive(Debug, Clone, Default)]
pub struct SeqNumMap {
    values: HashMap<u32, u32>,
    order: VecDeque<u32>,
}

impl SeqNumMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key -> value`, evicting the oldest entry first if the
    /// map is already at [`CAPACITY`]. Re-inserting an existing key
    /// does not change its eviction order, mirroring the source's plain
    /// `dict` assignment.
    pub fn insert(&mut self, key: u32, value: u32) {
        if self.values.insert(key, value).is_some() {
            return;
        }

        if self.values.len() > CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.values.remove(&oldest);
            }
        }

        self.order.push_back(key);
    }

    #[must_use]
    pub fn get(&self, key: u32) -> Option<u32> {
        self.values.get(&key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_retrieves_a_mapping() {
        let mut map = SeqNumMap::new();

        map.insert(7, 3);

        assert_eq!(map.get(7), Some(3));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn missing_key_returns_none() {
        let map = SeqNumMap::new();

        assert_eq!(map.get(42), None);
    }

    #[test]
    fn evicts_oldest_entry_once_capacity_is_exceeded() {
        let mut map = SeqNumMap::new();

        for i in 0..(CAPACITY as u32 + 1) {
            map.insert(i, i * 10);
        }

        assert_eq!(map.len(), CAPACITY);
        assert_eq!(map.get(0), None, "oldest entry should have been evicted");
        assert_eq!(map.get(1), Some(10), "second-oldest entry should survive");
        assert_eq!(map.get(CAPACITY as u32), Some(CAPACITY as u32 * 10));
    }

    #[test]
    fn stays_at_capacity_under_sustained_insertion() {
        let mut map = SeqNumMap::new();

        for i in 0..1_000u32 {
            map.insert(i, i);
            assert!(map.len() <= CAPACITY);
        }

        assert_eq!(map.len(), CAPACITY);
    }
}
