//! Cache table
//!
//! Lock discipline, one reader/writer lock per table:
//! - `count`/`exists`/`for_each` take the read lock only
//! - every structural mutation takes the write lock, including the
//!   promotion a `get` hit performs on the recency list
//! - the load callback runs with no table lock held; the post-load
//!   re-check and insert run atomically under the write lock
//! - the eviction callback runs strictly after the write lock is
//!   released, with the already-detached entry

use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::lru::LruIndex;
use crate::stats::CacheStats;

/// Capacity given to tables the registry creates with plain `allocate`.
pub const DEFAULT_CAPACITY: usize = 64;

/// Synthesizes the value for an absent key on a `get` miss.
pub type LoadCallback<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Observes a key/value pair the LRU policy demoted out of the table.
pub type ExpireCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Fixed-capacity key-value cache with least-recently-used eviction.
///
/// Any successful read or write counts as a "use": a `get` hit and every
/// `put` promote the entry to most-recently-used. Once the table is full,
/// inserting a new key demotes the least-recently-used entry, and a
/// configured [eviction callback](CacheTable::set_expire_callback) is
/// told about the demoted pair. A configured
/// [load callback](CacheTable::set_load_callback) turns `get` misses
/// into fills.
///
/// All methods take `&self`; share the table across threads with `Arc`.
pub struct CacheTable<K, V> {
    inner: RwLock<LruIndex<K, V>>,
    capacity: usize,
    load: RwLock<Option<LoadCallback<K, V>>>,
    expire: RwLock<Option<ExpireCallback<K, V>>>,
    stats: CacheStats,
}

impl<K, V> CacheTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LruIndex::new(capacity)),
            capacity,
            load: RwLock::new(None),
            expire: RwLock::new(None),
            stats: CacheStats::new(),
        }
    }

    /// Current number of entries. Never exceeds the capacity.
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `key` is present. Unlike `get`, does not affect recency
    /// order and never triggers the load callback.
    pub fn exists(&self, key: &K) -> bool {
        self.inner.read().contains(key)
    }

    /// Visit every entry in unspecified order.
    ///
    /// The read lock is held across the whole traversal, so the visitor
    /// sees a consistent snapshot. The visitor must not call back into
    /// this table; the lock is not re-entrant and doing so can deadlock.
    pub fn for_each<F>(&self, visit: F)
    where
        F: FnMut(&K, &V),
    {
        self.inner.read().for_each(visit);
    }

    /// Remove every entry immediately. Bulk clearing is not an
    /// eviction: the eviction callback does not fire for any entry.
    pub fn flush(&self) {
        self.inner.write().clear();
    }

    /// Remove `key`, returning its prior value.
    ///
    /// Deletion is an explicit caller action, not a policy decision, so
    /// the eviction callback never fires here.
    pub fn delete(&self, key: &K) -> Option<V> {
        {
            let inner = self.inner.read();
            if !inner.contains(key) {
                return None;
            }
        }

        // The key may have been deleted or evicted since the read lock
        // was dropped; the locked remove is authoritative.
        let mut inner = self.inner.write();
        inner.remove(key)
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    ///
    /// On a miss with a load callback configured, the callback is
    /// invoked to synthesize the value and the result is inserted as if
    /// by `put`. The callback runs with no table lock held, so a slow
    /// load (a remote fetch, say) does not block other callers.
    ///
    /// # Returns
    /// * `Some(value)` on a hit or a successful load
    /// * `None` on a miss with no load callback configured
    pub fn get(&self, key: &K) -> Option<V> {
        let hit = {
            let inner = self.inner.read();
            inner.peek(key)
        };

        if let Some(value) = hit {
            // Promotion needs the write lock. The entry may have been
            // evicted or deleted since the read lock was dropped; the
            // promotion is then a no-op and this caller still returns
            // the value it already read, exactly once.
            let mut inner = self.inner.write();
            inner.touch(key);
            self.stats.record_hit();
            return Some(value);
        }

        self.stats.record_miss();
        let load = match self.load.read().clone() {
            Some(load) => load,
            None => return None,
        };

        let value = load(key);

        let evicted = {
            let mut inner = self.inner.write();
            // A concurrent caller may have filled the key while the
            // load ran; the occupant wins and this load's value is
            // dropped. Single occupancy, not single invocation.
            if let Some(existing) = inner.peek(key) {
                inner.touch(key);
                return Some(existing);
            }
            self.stats.record_insert();
            inner.insert(key.clone(), value.clone())
        };

        if let Some((k, v)) = evicted {
            self.stats.record_eviction();
            self.notify_expired(&k, &v);
        }
        Some(value)
    }

    /// Insert or overwrite `key`.
    ///
    /// An existing key keeps its entry: the value is overwritten in
    /// place, the entry is promoted, and the count is unchanged. A new
    /// key inserted into a full table first demotes the current
    /// least-recently-used entry; a configured eviction callback then
    /// runs with the demoted pair, after the write lock is released.
    pub fn put(&self, key: K, value: V) {
        self.stats.record_insert();

        let evicted = {
            let mut inner = self.inner.write();
            inner.insert(key, value)
        };

        if let Some((k, v)) = evicted {
            self.stats.record_eviction();
            self.notify_expired(&k, &v);
        }
    }

    /// Configure the load-on-miss callback. Replaces any previous one.
    /// Tables start with none, which disables load-on-miss.
    pub fn set_load_callback<F>(&self, load: F)
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        *self.load.write() = Some(Arc::new(load));
    }

    /// Configure the eviction callback. Replaces any previous one.
    /// Tables start with none, which disables eviction notification.
    pub fn set_expire_callback<F>(&self, expire: F)
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        *self.expire.write() = Some(Arc::new(expire));
    }

    /// Cumulative hit/miss/insert/eviction counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Run the eviction callback with a detached entry. Called with no
    /// table lock held. The entry is already unreachable from the
    /// table, so a panicking callback is contained and reported rather
    /// than propagated into an unrelated `put`.
    fn notify_expired(&self, key: &K, value: &V) {
        let expire = match self.expire.read().clone() {
            Some(expire) => expire,
            None => return,
        };

        if panic::catch_unwind(AssertUnwindSafe(|| expire(key, value))).is_err() {
            warn!("eviction callback panicked; entry was already evicted");
        }
    }
}

impl<K, V> Default for CacheTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A table with [`DEFAULT_CAPACITY`] entries, as the registry
    /// creates them.
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
