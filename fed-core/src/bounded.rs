//! Capacity-bounded map with optional time-to-live.
//!
//! Backs every store that remote peers can make grow: the nonce store, the
//! DNS pin store and the certificate pin store. Entries are evicted
//! oldest-first once `capacity` is reached, and entries older than the TTL
//! read as absent.
//!
//! Time is passed in explicitly (unix seconds) so expiry can be tested
//! without sleeping.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: u64,
    generation: u64,
}

/// Insertion-ordered map with a hard capacity and optional TTL.
///
/// Re-inserting a key moves it to the back of the eviction order.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    capacity: usize,
    ttl_secs: Option<u64>,
    entries: HashMap<K, Entry<V>>,
    /// Eviction order. May hold stale generations for re-inserted keys.
    order: VecDeque<(K, u64)>,
    next_generation: u64,
    evicted: u64,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a map holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, ttl_secs: Option<u64>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl_secs,
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_generation: 0,
            evicted: 0,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries (expired entries count until purged).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries evicted for capacity since creation.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    fn is_expired(&self, inserted_at: u64, now: u64) -> bool {
        match self.ttl_secs {
            Some(ttl) => now >= inserted_at.saturating_add(ttl),
            None => false,
        }
    }

    /// Look up a live (unexpired) entry.
    pub fn get(&self, key: &K, now: u64) -> Option<&V> {
        let entry = self.entries.get(key)?;
        if self.is_expired(entry.inserted_at, now) {
            None
        } else {
            Some(&entry.value)
        }
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &K, now: u64) -> bool {
        self.get(key, now).is_some()
    }

    /// When a stored entry was inserted, expired or not.
    pub fn inserted_at(&self, key: &K) -> Option<u64> {
        self.entries.get(key).map(|e| e.inserted_at)
    }

    /// Insert or replace an entry, evicting the oldest entries on overflow.
    ///
    /// Returns the keys evicted to make room.
    pub fn insert(&mut self, key: K, value: V, now: u64) -> Vec<K> {
        let generation = self.next_generation;
        self.next_generation += 1;

        self.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: now,
                generation,
            },
        );
        self.order.push_back((key, generation));

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some((old, gen)) => {
                    if self.entries.get(&old).map(|e| e.generation) == Some(gen) {
                        self.entries.remove(&old);
                        self.evicted += 1;
                        evicted.push(old);
                    }
                }
                None => break,
            }
        }

        if self.order.len() > self.capacity.saturating_mul(2) + 16 {
            self.compact();
        }

        evicted
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // The stale order slot is skipped on eviction or compaction.
        self.entries.remove(key).map(|e| e.value)
    }

    /// Drop expired entries from the front of the eviction order.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        if self.ttl_secs.is_none() {
            return 0;
        }
        let mut removed = 0;
        while let Some((key, gen)) = self.order.front().cloned() {
            match self.entries.get(&key) {
                Some(entry) if entry.generation == gen => {
                    if !self.is_expired(entry.inserted_at, now) {
                        break;
                    }
                    self.entries.remove(&key);
                    removed += 1;
                }
                _ => {}
            }
            self.order.pop_front();
        }
        removed
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(k, gen)| entries.get(k).map(|e| e.generation) == Some(*gen));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut map = BoundedMap::new(4, None);
        map.insert("a", 1, 0);
        assert_eq!(map.get(&"a", 0), Some(&1));
        assert!(map.contains(&"a", 1_000_000));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn oldest_is_evicted_on_overflow() {
        let mut map = BoundedMap::new(3, None);
        map.insert(1, "one", 0);
        map.insert(2, "two", 1);
        map.insert(3, "three", 2);
        let evicted = map.insert(4, "four", 3);

        assert_eq!(evicted, vec![1]);
        assert_eq!(map.len(), 3);
        assert!(!map.contains(&1, 3));
        assert!(map.contains(&4, 3));
        assert_eq!(map.evicted_count(), 1);
    }

    #[test]
    fn reinsert_moves_to_back() {
        let mut map = BoundedMap::new(2, None);
        map.insert("a", 1, 0);
        map.insert("b", 2, 1);
        map.insert("a", 3, 2); // refresh a
        let evicted = map.insert("c", 4, 3);

        assert_eq!(evicted, vec!["b"]);
        assert_eq!(map.get(&"a", 3), Some(&3));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut map = BoundedMap::new(10, Some(300));
        map.insert("host", 1, 1_000);

        assert!(map.contains(&"host", 1_299));
        assert!(!map.contains(&"host", 1_300));
        // Expired entries still occupy space until purged.
        assert_eq!(map.len(), 1);
        assert_eq!(map.purge_expired(1_300), 1);
        assert!(map.is_empty());
    }

    #[test]
    fn purge_stops_at_first_live_entry() {
        let mut map = BoundedMap::new(10, Some(100));
        map.insert(1, (), 0);
        map.insert(2, (), 50);
        map.insert(3, (), 90);

        assert_eq!(map.purge_expired(120), 1);
        assert_eq!(map.len(), 2);
        assert!(map.contains(&2, 120));
    }

    #[test]
    fn remove_leaves_no_ghost_eviction() {
        let mut map = BoundedMap::new(2, None);
        map.insert("a", 1, 0);
        map.insert("b", 2, 0);
        assert_eq!(map.remove(&"a"), Some(1));
        let evicted = map.insert("c", 3, 0);
        assert!(evicted.is_empty());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn capacity_never_exceeded_under_churn() {
        let mut map = BoundedMap::new(100, None);
        for i in 0..10_000u32 {
            map.insert(i % 250, i, i as u64);
            assert!(map.len() <= 100);
        }
        // Stale order slots are compacted, not accumulated.
        assert!(map.order.len() <= 100 * 2 + 16 + 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut map = BoundedMap::new(0, None);
        map.insert("a", 1, 0);
        assert_eq!(map.capacity(), 1);
        assert_eq!(map.len(), 1);
    }
}
