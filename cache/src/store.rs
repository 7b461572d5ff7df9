use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

pub(crate) type Shard<K, V, H> = HashMap<K, Arc<CacheEntry<K, V>>, H>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The entry table, partitioned into independently locked shards.
///
/// Lookups only take a shard's read lock; the write lock is held just long
/// enough to insert or detach an entry. Entry contents are guarded by each
/// entry's own mutex, never by the shard lock.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<RwLock<Shard<K, V, H>>>]>,
  hasher: H,
  len: CachePadded<AtomicUsize>,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .field("len", &self.len.load(Ordering::Relaxed))
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with `num_shards` shards and the given hasher.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
      len: CachePadded::new(AtomicUsize::new(0)),
    }
  }

  #[inline]
  fn shard_for(&self, key: &K) -> &RwLock<Shard<K, V, H>> {
    // num_shards > 0 is checked when the configuration is validated.
    let index = hash_key(&self.hasher, key) as usize % self.shards.len();
    &self.shards[index]
  }

  #[inline]
  pub(crate) fn hash(&self, key: &K) -> u64 {
    hash_key(&self.hasher, key)
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// Number of entries reachable through the store, in any state.
  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len.load(Ordering::Acquire)
  }

  pub(crate) fn lookup(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
    self.shard_for(key).read().get(key).cloned()
  }

  /// Returns the entry for `key`, inserting a `Creating` placeholder on a miss.
  /// The flag tells whether this call inserted it.
  pub(crate) fn get_or_create(&self, key: &K) -> (Arc<CacheEntry<K, V>>, bool) {
    let shard = self.shard_for(key);
    if let Some(entry) = shard.read().get(key) {
      return (entry.clone(), false);
    }

    let mut guard = shard.write();
    // Another thread may have inserted between the two lock sections.
    if let Some(entry) = guard.get(key) {
      return (entry.clone(), false);
    }
    let entry = Arc::new(CacheEntry::new(key.clone()));
    guard.insert(key.clone(), entry.clone());
    self.len.fetch_add(1, Ordering::AcqRel);
    (entry, true)
  }

  /// Detaches `entry` from the store, unless the slot already holds a
  /// different entry for the same key.
  pub(crate) fn remove_if_same(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    let mut guard = self.shard_for(&entry.key).write();
    match guard.get(&entry.key) {
      Some(current) if Arc::ptr_eq(current, entry) => {
        guard.remove(&entry.key);
        self.len.fetch_sub(1, Ordering::AcqRel);
        true
      }
      _ => false,
    }
  }

  /// Detaches every entry. `while_locked` runs while all shards are write
  /// locked, so no entry can be inserted concurrently.
  pub(crate) fn clear(&self, while_locked: impl FnOnce()) -> Vec<Arc<CacheEntry<K, V>>> {
    let mut guards: Vec<_> = self.shards.iter().map(|shard| shard.write()).collect();
    while_locked();

    let mut detached = Vec::with_capacity(self.len());
    for guard in guards.iter_mut() {
      detached.extend(guard.drain().map(|(_, entry)| entry));
    }
    self.len.store(0, Ordering::Release);
    detached
  }

  /// Copies out the entries of one shard. Used by iteration, which looks at
  /// one shard at a time.
  pub(crate) fn shard_entries(&self, index: usize) -> Vec<Arc<CacheEntry<K, V>>> {
    self
      .shards
      .get(index)
      .map(|shard| shard.read().values().cloned().collect())
      .unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> ShardedStore<u64, String, ahash::RandomState> {
    ShardedStore::new(4, ahash::RandomState::new())
  }

  #[test]
  fn get_or_create_inserts_once() {
    let store = store();
    let (first, created) = store.get_or_create(&1);
    assert!(created);
    let (second, created) = store.get_or_create(&1);
    assert!(!created);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn remove_if_same_ignores_replaced_slot() {
    let store = store();
    let (old, _) = store.get_or_create(&1);
    assert!(store.remove_if_same(&old));
    let (fresh, _) = store.get_or_create(&1);

    assert!(!store.remove_if_same(&old));
    assert!(store.lookup(&1).is_some());
    assert!(store.remove_if_same(&fresh));
    assert_eq!(store.len(), 0);
  }

  #[test]
  fn clear_detaches_everything() {
    let store = store();
    for key in 0..20 {
      store.get_or_create(&key);
    }
    let mut ran = false;
    let detached = store.clear(|| ran = true);

    assert!(ran);
    assert_eq!(detached.len(), 20);
    assert_eq!(store.len(), 0);
    let total: usize = (0..store.num_shards()).map(|i| store.shard_entries(i).len()).sum();
    assert_eq!(total, 0);
  }
}
