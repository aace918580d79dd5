//! # memotable
//!
//! Embedded, fixed-capacity LRU cache with load-on-miss, eviction
//! notification, and a process-wide registry of named tables.
//!
//! ## Architecture
//! - **Hash index**: AHash map from key to arena slot (O(1) lookup)
//! - **Recency list**: arena-backed doubly-linked list (O(1) promotion
//!   and eviction, no pointer cycles)
//! - **Concurrency**: one coarse reader/writer lock per table; load and
//!   eviction callbacks run with no table lock held
//! - **Registry**: one table per name for the process lifetime,
//!   double-checked creation under races
//!
//! ## Example
//!
//! ```
//! use memotable::CacheTable;
//!
//! let sessions: CacheTable<String, u64> = CacheTable::new(128);
//!
//! sessions.set_load_callback(|key: &String| key.len() as u64);
//! sessions.set_expire_callback(|key: &String, value: &u64| {
//!     println!("expired {} = {}", key, value);
//! });
//!
//! sessions.put("alice".to_string(), 1);
//! assert_eq!(sessions.get(&"alice".to_string()), Some(1));
//!
//! // Miss: the load callback fills the entry
//! assert_eq!(sessions.get(&"bob".to_string()), Some(3));
//! assert!(sessions.exists(&"bob".to_string()));
//! ```

#![warn(missing_docs)]

mod item;
mod lru;
mod registry;
mod stats;
mod table;

pub use registry::{allocate, allocate_with_capacity, global, CacheRegistry};
pub use stats::CacheStats;
pub use table::{CacheTable, ExpireCallback, LoadCallback, DEFAULT_CAPACITY};
