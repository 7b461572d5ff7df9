use crate::bulk::GetAllResult;
use crate::config::CacheConfig;
use crate::entry::CacheEntryView;
use crate::entry_api::MutableEntry;
use crate::error::CacheError;
use crate::iter::CacheIter;
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A thread-safe, synchronous cache with an optional loader.
///
/// Dropping the handle destroys the cache: background threads are stopped and
/// joined and every entry is detached.
pub struct Cache<K, V, H = ahash::RandomState>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn from_shared(shared: Arc<CacheShared<K, V, H>>) -> Self {
    Self { shared }
  }

  /// Returns the value for `key`, calling the loader on a miss.
  ///
  /// Concurrent callers for the same key share a single loader call and all
  /// receive its result. Without a loader, a miss fails with
  /// [`CacheError::LoaderMissing`].
  pub fn get(&self, key: &K) -> Result<Arc<V>, CacheError> {
    self.shared.get(key)
  }

  /// Returns the value for `key` without loading it.
  ///
  /// A failure captured by the last load is returned as an error until the
  /// entry is overwritten.
  pub fn peek(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.peek(key)
  }

  /// Like [`peek`](Self::peek), with the entry's metadata.
  pub fn peek_entry(&self, key: &K) -> Result<Option<CacheEntryView<K, V>>, CacheError> {
    self.shared.peek_entry(key)
  }

  /// Whether a readable value is present. Never loads.
  pub fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
    self.shared.contains_key(key)
  }

  /// Inserts or overwrites the value for `key`. A load running for the key is
  /// superseded: its caller still gets the loaded value, the cache keeps this one.
  pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    self.shared.put(key, value)
  }

  /// Inserts the value only if no readable value is present. Returns whether
  /// it was inserted.
  pub fn put_if_absent(&self, key: K, value: V) -> Result<bool, CacheError> {
    self.shared.put_if_absent(key, value)
  }

  /// Inserts the value and returns the one it replaced.
  pub fn peek_and_put(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.peek_and_put(key, value)
  }

  /// Overwrites the value only if a readable value is present.
  pub fn replace(&self, key: K, value: V) -> Result<bool, CacheError> {
    self.shared.replace(key, value)
  }

  pub fn peek_and_replace(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.peek_and_replace(key, value)
  }

  /// Overwrites the value only if the present value equals `expected`.
  pub fn replace_if_equals(&self, key: K, expected: &V, value: V) -> Result<bool, CacheError>
  where
    V: PartialEq,
  {
    self.shared.replace_if_equals(key, expected, value)
  }

  /// Runs `op` atomically against the entry for `key`.
  ///
  /// See [`MutableEntry`] for what the closure can do. The closure must not
  /// call back into this cache for the same key.
  pub fn invoke<R, F>(&self, key: K, op: F) -> Result<R, CacheError>
  where
    F: FnOnce(&mut MutableEntry<'_, K, V>) -> R,
  {
    self.shared.invoke(&key, op)
  }

  /// Removes the entry for `key`, returning whether a readable value was
  /// removed.
  pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
    self.shared.remove(key)
  }

  /// Removes the given keys as one set. Keys that are being loaded at that
  /// moment are skipped.
  pub fn remove_all_at_once<I>(&self, keys: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.remove_all_at_once(keys)
  }

  /// Starts loading `key` in the background unless it is present or already
  /// loading. Never blocks; does nothing when the worker pool is saturated.
  pub fn prefetch(&self, key: &K) -> Result<(), CacheError> {
    self.shared.prefetch(key).map(|_| ())
  }

  pub fn prefetch_all<I>(&self, keys: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.prefetch_all(keys)
  }

  /// Prefetches `keys[start..end]`. An invalid range does nothing.
  pub fn prefetch_range(&self, keys: &[K], start: usize, end: usize) -> Result<(), CacheError> {
    self.shared.prefetch_range(keys, start, end)
  }

  /// Returns the values for a set of keys, loading the missing ones.
  ///
  /// The result holds one slot per distinct key. A failed load does not fail
  /// the call; its error is returned when that key is read from the result.
  pub fn get_all<I>(&self, keys: I) -> Result<GetAllResult<K, V>, CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.get_all(keys)
  }

  /// Returns an iterator over the readable entries. See [`CacheIter`] for its
  /// consistency guarantees.
  pub fn iter(&self) -> Result<CacheIter<'_, K, V, H>, CacheError> {
    self.shared.ensure_alive()?;
    Ok(CacheIter::new(&self.shared))
  }

  /// Removes every entry. Loads running at this moment complete for their
  /// own callers only.
  pub fn clear(&self) -> Result<(), CacheError> {
    self.shared.clear()
  }

  /// Drops expired data kept by a secondary store. There is none, so this
  /// only checks that the cache is alive.
  pub fn purge(&self) -> Result<(), CacheError> {
    self.shared.ensure_alive()
  }

  /// Writes pending data to a secondary store. There is none, so this only
  /// checks that the cache is alive.
  pub fn flush(&self) -> Result<(), CacheError> {
    self.shared.ensure_alive()
  }

  /// Stops background work and releases every entry. Every later operation
  /// fails with [`CacheError::Destroyed`]. Calling it again does nothing.
  pub fn destroy(&self) {
    self.shared.shutdown();
  }

  pub fn is_destroyed(&self) -> bool {
    self.shared.is_destroyed()
  }

  /// Number of entries in the store, including entries being loaded and
  /// expired entries kept for their data.
  pub fn total_entry_count(&self) -> usize {
    self.shared.store.len()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot(self.shared.store.len())
  }

  pub fn config(&self) -> &CacheConfig {
    &self.shared.config
  }
}

impl<K, V, H> Drop for Cache<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    self.shared.shutdown();
  }
}

impl<K, V, H> fmt::Debug for Cache<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("shared", &self.shared)
      .field("entries", &self.total_entry_count())
      .finish()
  }
}
