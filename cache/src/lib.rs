//! An embeddable, concurrent, loading cache.
//!
//! # Features
//! - **Loading**: A miss calls the configured loader. Concurrent callers for the
//!   same key share one loader call and all see its result, value or error.
//! - **Precise Expiry**: Lagging expiry removes entries within one timer slot;
//!   sharp expiry never hands out a value at or after its expiry instant.
//! - **Bounded Size**: Pluggable eviction (Clock by default, LRU, Random) keeps
//!   the cache within its capacity. Entries being loaded are never evicted.
//! - **Background Loads**: Prefetching and refresh-ahead run on a bounded pool
//!   of loader threads and never block the caller.
//! - **Bulk Operations**: `get_all` loads many keys in parallel without risking
//!   a deadlock against concurrent callers.
//! - **Observability**: Exposes counters through [`Cache::metrics`] and logs
//!   through `tracing`.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use strand_cache::CacheBuilder;
//!
//! let cache = CacheBuilder::<u64, String>::new()
//!   .capacity(1_000)
//!   .expire_after_write(Duration::from_secs(60))
//!   .loader(|id: &u64| Ok::<_, std::io::Error>(format!("user-{id}")))
//!   .build()
//!   .unwrap();
//!
//! assert_eq!(*cache.get(&7).unwrap(), "user-7");
//! assert!(cache.contains_key(&7).unwrap());
//! ```

// Public modules that form the API
pub mod builder;
pub mod bulk;
pub mod config;
pub mod entry_api;
pub mod error;
pub mod expiry;
pub mod handles;
pub mod iter;
pub mod metrics;
pub mod policy;

// Internal, crate-only modules
mod entry;
mod fetch;
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use bulk::GetAllResult;
pub use config::CacheConfig;
pub use entry::{CacheEntryView, EntryState};
pub use entry_api::MutableEntry;
pub use error::{BoxError, BuildError, CacheError, FailureOrigin, LoadError};
pub use expiry::{ExpiryPolicy, ExpiryTime};
pub use handles::Cache;
pub use iter::CacheIter;
pub use metrics::MetricsSnapshot;
pub use policy::clock::ClockPolicy;
pub use policy::lru::LruPolicy;
#[cfg(feature = "random")]
pub use policy::random::RandomPolicy;
pub use policy::EvictionPolicy;
