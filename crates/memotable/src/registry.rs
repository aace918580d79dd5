//! Named table registry
//!
//! One cache table per name, created on first request and shared by
//! every later caller for the life of the registry.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::debug;

use crate::table::{CacheTable, DEFAULT_CAPACITY};

/// Registry of named cache tables.
///
/// Tables are heterogeneous: each name picks its own key/value types at
/// the first `allocate` call site. The types are erased inside the map
/// and recovered by downcast, so every call site for one name must
/// agree on them; a mismatch is a programmer error and panics.
///
/// Most code wants the process-wide registry via [`allocate`] rather
/// than its own instance.
pub struct CacheRegistry {
    tables: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>, RandomState>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Get the table called `name`, creating it with
    /// [`DEFAULT_CAPACITY`] on first request.
    ///
    /// Idempotent per name: every caller gets a handle to the same
    /// underlying table, no matter how first accesses race.
    pub fn allocate<K, V>(&self, name: &str) -> Arc<CacheTable<K, V>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.allocate_with_capacity(name, DEFAULT_CAPACITY)
    }

    /// Like [`allocate`](CacheRegistry::allocate), but a table created
    /// by *this* call gets the given capacity. If the name already
    /// exists, the existing table and its capacity win.
    pub fn allocate_with_capacity<K, V>(&self, name: &str, capacity: usize) -> Arc<CacheTable<K, V>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        // Fast path: after warmup the table almost always exists, so a
        // shared read lock is enough.
        {
            let tables = self.tables.read();
            if let Some(table) = tables.get(name) {
                return downcast(name, table);
            }
        }

        let mut tables = self.tables.write();
        // Re-check: another thread may have created the table between
        // the two locks. Exactly one construction per name.
        if let Some(table) = tables.get(name) {
            return downcast(name, table);
        }

        debug!(name, capacity, "creating cache table");
        let table = Arc::new(CacheTable::<K, V>::new(capacity));
        tables.insert(
            name.to_string(),
            Arc::clone(&table) as Arc<dyn Any + Send + Sync>,
        );
        table
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast<K, V>(name: &str, table: &Arc<dyn Any + Send + Sync>) -> Arc<CacheTable<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    match Arc::clone(table).downcast::<CacheTable<K, V>>() {
        Ok(table) => table,
        Err(_) => panic!(
            "cache table '{}' was allocated with different key/value types",
            name
        ),
    }
}

static GLOBAL: OnceLock<CacheRegistry> = OnceLock::new();

/// The process-wide registry. Lives until the process exits.
pub fn global() -> &'static CacheRegistry {
    GLOBAL.get_or_init(CacheRegistry::new)
}

/// Get the table called `name` from the process-wide registry, creating
/// it with [`DEFAULT_CAPACITY`] on first request.
pub fn allocate<K, V>(name: &str) -> Arc<CacheTable<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    global().allocate(name)
}

/// Like [`allocate`], with an explicit capacity for first-time creation.
pub fn allocate_with_capacity<K, V>(name: &str, capacity: usize) -> Arc<CacheTable<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    global().allocate_with_capacity(name, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_allocate_is_idempotent() {
        let registry = CacheRegistry::new();

        let first: Arc<CacheTable<String, u32>> = registry.allocate("users");
        let second: Arc<CacheTable<String, u32>> = registry.allocate("users");

        assert!(Arc::ptr_eq(&first, &second));

        // Mutations through one handle are visible through the other
        first.put("alice".to_string(), 7);
        assert_eq!(second.get(&"alice".to_string()), Some(7));
    }

    #[test]
    fn test_distinct_names_distinct_tables() {
        let registry = CacheRegistry::new();

        let left: Arc<CacheTable<u32, u32>> = registry.allocate("left");
        let right: Arc<CacheTable<u32, u32>> = registry.allocate("right");

        left.put(1, 1);
        assert!(!right.exists(&1));
    }

    #[test]
    fn test_default_capacity_is_64() {
        let registry = CacheRegistry::new();

        let table: Arc<CacheTable<u32, u32>> = registry.allocate("sized");

        assert_eq!(table.capacity(), DEFAULT_CAPACITY);
        assert_eq!(table.capacity(), 64);
    }

    #[test]
    fn test_allocate_with_capacity_first_wins() {
        let registry = CacheRegistry::new();

        let first: Arc<CacheTable<u32, u32>> = registry.allocate_with_capacity("small", 2);
        let second: Arc<CacheTable<u32, u32>> = registry.allocate_with_capacity("small", 100);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 2);
    }

    #[test]
    #[should_panic(expected = "different key/value types")]
    fn test_type_mismatch_panics() {
        let registry = CacheRegistry::new();

        let _: Arc<CacheTable<String, u32>> = registry.allocate("mixed");
        let _: Arc<CacheTable<u32, String>> = registry.allocate("mixed");
    }

    #[test]
    fn test_concurrent_allocate_single_construction() {
        let registry = Arc::new(CacheRegistry::new());
        let threads = 10;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let table: Arc<CacheTable<u64, u64>> = registry.allocate("contended");
                    Arc::as_ptr(&table) as usize
                })
            })
            .collect();

        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Every racer observed the same instance
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_global_registry_shared_across_call_sites() {
        let first: Arc<CacheTable<String, String>> = allocate("global-shared");
        first.put("k".to_string(), "v".to_string());

        let second: Arc<CacheTable<String, String>> = allocate("global-shared");
        assert_eq!(second.get(&"k".to_string()), Some("v".to_string()));
    }
}
