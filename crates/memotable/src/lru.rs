//! Hash-indexed recency list
//!
//! Arena-backed doubly-linked list keyed by a hash map, giving O(1)
//! lookup, promotion, eviction, and removal. The head is the least
//! recently used entry, the tail the most recently used.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

use crate::item::CacheItem;

/// Unsynchronized LRU core. Owned by exactly one `CacheTable`, which
/// serializes access through its lock.
///
/// The map and the list always index the same set of entries; every
/// operation that touches one repairs the other before returning.
pub(crate) struct LruIndex<K, V> {
    map: HashMap<K, usize, RandomState>,
    slots: Vec<Option<CacheItem<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<K, V> LruIndex<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");

        Self {
            map: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Clone the value for `key` without touching recency order.
    pub(crate) fn peek(&self, key: &K) -> Option<V> {
        let &idx = self.map.get(key)?;
        self.slots[idx].as_ref().map(|item| item.value.clone())
    }

    /// Promote `key` to the most-recently-used position. No-op if the
    /// key is absent.
    pub(crate) fn touch(&mut self, key: &K) {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_tail(idx);
        }
    }

    /// Insert or update `key`.
    ///
    /// An existing entry has its value overwritten in place and is
    /// promoted; no eviction happens. A new entry at capacity first
    /// evicts the head, and the detached key/value pair is returned so
    /// the caller can notify after it releases its lock.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(item) = &mut self.slots[idx] {
                item.value = value;
            }
            self.move_to_tail(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.evict_head()
        } else {
            None
        };

        let idx = self.alloc_slot();
        let mut item = CacheItem::new(key.clone(), value);
        item.prev = self.tail;
        self.slots[idx] = Some(item);

        if let Some(tail_idx) = self.tail {
            if let Some(tail) = &mut self.slots[tail_idx] {
                tail.next = Some(idx);
            }
        } else {
            // List was empty (or just emptied by a capacity-1 eviction).
            self.head = Some(idx);
        }
        self.tail = Some(idx);

        self.map.insert(key, idx);
        evicted
    }

    /// Remove `key`, returning its prior value.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let item = self.slots[idx].take();
        self.free_slot(idx);
        item.map(|item| item.value)
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Visit every entry in unspecified order.
    pub(crate) fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V),
    {
        for &idx in self.map.values() {
            if let Some(item) = &self.slots[idx] {
                visit(&item.key, &item.value);
            }
        }
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return; // Already most recent
        }

        self.unlink(idx);

        if let Some(item) = &mut self.slots[idx] {
            item.prev = self.tail;
            item.next = None;
        }

        if let Some(tail_idx) = self.tail {
            if let Some(tail) = &mut self.slots[tail_idx] {
                tail.next = Some(idx);
            }
        } else {
            self.head = Some(idx);
        }

        self.tail = Some(idx);
    }

    /// Splice `idx` out of the list, repairing head/tail and neighbor
    /// links. The slot itself is left in place.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = if let Some(item) = &self.slots[idx] {
            (item.prev, item.next)
        } else {
            return;
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_item) = &mut self.slots[prev_idx] {
                    prev_item.next = next;
                }
            }
            None => {
                self.head = next;
            }
        }

        match next {
            Some(next_idx) => {
                if let Some(next_item) = &mut self.slots[next_idx] {
                    next_item.prev = prev;
                }
            }
            None => {
                self.tail = prev;
            }
        }
    }

    /// Detach the current least-recently-used entry.
    fn evict_head(&mut self) -> Option<(K, V)> {
        let head_idx = self.head?;
        self.unlink(head_idx);
        let item = self.slots[head_idx].take()?;
        self.map.remove(&item.key);
        self.free_slot(head_idx);
        Some(item.into_pair())
    }

    fn alloc_slot(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            idx
        } else {
            let idx = self.slots.len();
            self.slots.push(None);
            idx
        }
    }

    fn free_slot(&mut self, idx: usize) {
        self.free.push(idx);
    }

    #[cfg(test)]
    fn lru_key(&self) -> Option<&K> {
        let idx = self.head?;
        self.slots[idx].as_ref().map(|item| &item.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_peek() {
        let mut index = LruIndex::new(4);

        assert_eq!(index.insert(1, "a"), None);
        assert_eq!(index.insert(2, "b"), None);

        assert_eq!(index.peek(&1), Some("a"));
        assert_eq!(index.peek(&2), Some("b"));
        assert_eq!(index.peek(&3), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_eviction_returns_detached_pair() {
        let mut index = LruIndex::new(2);

        index.insert(1, "a");
        index.insert(2, "b");
        let evicted = index.insert(3, "c");

        assert_eq!(evicted, Some((1, "a")));
        assert_eq!(index.len(), 2);
        assert!(!index.contains(&1));
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let mut index = LruIndex::new(2);

        index.insert(1, "a");
        index.insert(2, "b");
        index.touch(&1);
        let evicted = index.insert(3, "c");

        assert_eq!(evicted, Some((2, "b")));
        assert!(index.contains(&1));
    }

    #[test]
    fn test_update_promotes_without_eviction() {
        let mut index = LruIndex::new(2);

        index.insert(1, "a");
        index.insert(2, "b");
        assert_eq!(index.insert(1, "a2"), None);

        assert_eq!(index.len(), 2);
        assert_eq!(index.peek(&1), Some("a2"));
        // Key 2 is now least recent
        assert_eq!(index.lru_key(), Some(&2));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut index = LruIndex::new(2);

        index.insert(1, "a");
        index.insert(2, "b");
        index.peek(&1);

        assert_eq!(index.lru_key(), Some(&1));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut index = LruIndex::new(3);

        index.insert(1, "a");
        index.insert(2, "b");
        index.insert(3, "c");

        assert_eq!(index.remove(&2), Some("b"));
        assert_eq!(index.remove(&1), Some("a"));
        assert_eq!(index.remove(&3), Some("c"));
        assert_eq!(index.remove(&3), None);
        assert_eq!(index.len(), 0);

        // Slots are recycled and the list is rebuilt cleanly
        index.insert(4, "d");
        index.insert(5, "e");
        assert_eq!(index.lru_key(), Some(&4));
    }

    #[test]
    fn test_capacity_one() {
        let mut index = LruIndex::new(1);

        index.insert(1, "a");
        assert_eq!(index.insert(2, "b"), Some((1, "a")));
        assert_eq!(index.insert(3, "c"), Some((2, "b")));

        assert_eq!(index.len(), 1);
        assert_eq!(index.peek(&3), Some("c"));
        assert_eq!(index.lru_key(), Some(&3));
    }

    #[test]
    fn test_clear() {
        let mut index = LruIndex::new(3);

        index.insert(1, "a");
        index.insert(2, "b");
        index.clear();

        assert_eq!(index.len(), 0);
        assert_eq!(index.lru_key(), None);

        index.insert(3, "c");
        assert_eq!(index.peek(&3), Some("c"));
    }

    #[test]
    fn test_for_each_visits_all() {
        let mut index = LruIndex::new(4);

        for i in 0..4 {
            index.insert(i, i * 10);
        }

        let mut seen = Vec::new();
        index.for_each(|&k, &v| seen.push((k, v)));
        seen.sort_unstable();

        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_rejected() {
        let _ = LruIndex::<u32, u32>::new(0);
    }
}
