//! A map that remembers recency of access.
//!
//! `LruMap<K, V>` tags every entry with the value of a monotonic access
//! counter; whichever entry carries the lowest stamp is the least recently
//! used. The page cache uses this to pick eviction victims, and because
//! entries may be pinned, dirty, or otherwise unevictable, the map itself
//! never evicts: the owner trims it with [`LruMap::pop_lru_where`] under
//! its own policy, and that call scans for the oldest entry the predicate
//! accepts.
//!
//! Recency by stamping trades a pointer-chased list for one counter per
//! entry: reads and inserts are a single stamp store, and only the
//! (rare) eviction scan pays a linear pass.
//!
//! # Example
//! ```ignore
//! let mut map: LruMap<i32, &str> = LruMap::new();
//! map.put(1, "one");
//! map.put(2, "two");
//! map.get(&1); // 1 is now the most recently used
//! assert_eq!(map.pop_lru_where(|_, _| true), Some((2, "two")));
//! ```

use alloc::collections::BTreeMap;

struct Node<V> {
    v: V,
    /// Access-counter value at the last touch; lowest is oldest.
    stamp: u64,
}

/// A map ordered by recency of access through per-entry stamps.
pub struct LruMap<K: Ord + Clone, V> {
    inner: BTreeMap<K, Node<V>>,
    tick: u64,
}

impl<K: Ord + Clone, V> Default for LruMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> LruMap<K, V> {
    /// Makes a new, empty `LruMap`.
    ///
    /// Does not allocate anything on its own.
    pub const fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_stamp(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns a mutable reference to the value corresponding to the key
    /// and updates the last access time.
    pub fn get(&mut self, k: &K) -> Option<&mut V> {
        let stamp = self.next_stamp();
        let node = self.inner.get_mut(k)?;
        node.stamp = stamp;
        Some(&mut node.v)
    }

    /// Returns a mutable reference to the value corresponding to the key
    /// without touching the access order.
    pub fn peek(&mut self, k: &K) -> Option<&mut V> {
        self.inner.get_mut(k).map(|node| &mut node.v)
    }

    /// Inserts a key-value pair, making it the most recently used entry.
    ///
    /// If the map did have this key present, the value is updated.
    pub fn put(&mut self, k: K, v: V) {
        let stamp = self.next_stamp();
        self.inner.insert(k, Node { v, stamp });
    }

    /// Removes a key from the map, returning the stored value if the key
    /// was present.
    pub fn remove(&mut self, k: &K) -> Option<V> {
        self.inner.remove(k).map(|node| node.v)
    }

    /// Removes and returns the least recently used entry satisfying `f`.
    ///
    /// Of every entry the predicate accepts, the one with the oldest
    /// access stamp is removed.
    pub fn pop_lru_where(&mut self, mut f: impl FnMut(&K, &V) -> bool) -> Option<(K, V)> {
        let mut oldest: Option<(&K, u64)> = None;
        for (k, node) in self.inner.iter() {
            if !f(k, &node.v) {
                continue;
            }
            match oldest {
                Some((_, stamp)) if stamp <= node.stamp => {}
                _ => oldest = Some((k, node.stamp)),
            }
        }
        let victim = oldest.map(|(k, _)| k.clone())?;
        let node = self.inner.remove(&victim)?;
        Some((victim, node.v))
    }

    /// Retains only the elements specified by the predicate.
    ///
    /// In other words, removes all pairs `(k, v)` for which `f(&k, &mut v)`
    /// returns `false`.
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        self.inner.retain(|k, node| f(k, &mut node.v));
    }

    /// Iterates over the key-value pairs in the map.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut().map(|(k, node)| (k, &mut node.v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_order() {
        let mut map: LruMap<i32, i32> = LruMap::new();
        map.put(1, 10);
        map.put(2, 20);
        map.put(3, 30);
        map.get(&1);
        assert_eq!(map.pop_lru_where(|_, _| true), Some((2, 20)));
        assert_eq!(map.pop_lru_where(|_, _| true), Some((3, 30)));
        assert_eq!(map.pop_lru_where(|_, _| true), Some((1, 10)));
        assert!(map.is_empty());
    }

    #[test]
    fn conditional_pop_skips_unmatched() {
        let mut map: LruMap<i32, i32> = LruMap::new();
        map.put(1, 10);
        map.put(2, 20);
        assert_eq!(map.pop_lru_where(|k, _| *k != 1), Some((2, 20)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.peek(&1), Some(&mut 10));
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let mut map: LruMap<i32, i32> = LruMap::new();
        map.put(1, 10);
        map.put(2, 20);
        map.put(1, 11);
        assert_eq!(map.pop_lru_where(|_, _| true), Some((2, 20)));
        assert_eq!(map.pop_lru_where(|_, _| true), Some((1, 11)));
    }
}
