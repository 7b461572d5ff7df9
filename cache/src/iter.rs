//! Contains the iterator over a cache's contents.

use crate::entry::{CacheEntry, CacheEntryView};
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// An iterator over the readable entries of a [`Cache`](crate::Cache).
///
/// The entries of a shard are snapshotted when the iterator first reaches that
/// shard, holding the shard lock only for the copy.
///
/// # Consistency Guarantees
/// - An entry present when iteration begins is yielded unless it is removed or
///   expires before the iterator reaches it.
/// - No entry is yielded twice.
/// - Entries inserted into a shard that was already scanned are missed;
///   entries inserted into a shard not scanned yet may be included.
/// - Each value is read at the moment `next()` reaches it.
///
/// The iterator counts as an open iteration in the cache metrics until it is
/// exhausted or dropped.
pub struct CacheIter<'a, K, V, H> {
  shared: &'a CacheShared<K, V, H>,
  pending: Vec<Arc<CacheEntry<K, V>>>,
  next_shard: usize,
  open: bool,
}

impl<'a, K, V, H> CacheIter<'a, K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(shared: &'a CacheShared<K, V, H>) -> Self {
    shared.metrics.open_iterations.fetch_add(1, Ordering::Relaxed);
    Self {
      shared,
      pending: Vec::new(),
      next_shard: 0,
      open: true,
    }
  }

  /// Snapshots the next non-empty shard. Returns `false` once every shard was
  /// visited.
  fn load_next_shard(&mut self) -> bool {
    while self.next_shard < self.shared.store.num_shards() {
      let entries = self.shared.store.shard_entries(self.next_shard);
      self.next_shard += 1;
      if !entries.is_empty() {
        self.pending = entries;
        return true;
      }
    }
    false
  }
}

impl<'a, K, V, H> Iterator for CacheIter<'a, K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  type Item = CacheEntryView<K, V>;

  fn next(&mut self) -> Option<Self::Item> {
    while self.open {
      if self.shared.is_destroyed() {
        break;
      }
      let Some(entry) = self.pending.pop() else {
        if self.load_next_shard() {
          continue;
        }
        break;
      };

      let mut data = entry.lock();
      if data.detached {
        continue;
      }
      let now = Instant::now();
      if self.shared.readable_or_expire(&entry, &mut data, now).is_some() {
        if let Some(view) = data.view(&entry.key, now) {
          return Some(view);
        }
      }
    }
    self.close();
    None
  }
}

impl<'a, K, V, H> CacheIter<'a, K, V, H> {
  /// Releases the iteration. Runs once, on exhaustion or drop.
  fn close(&mut self) {
    if self.open {
      self.open = false;
      self.pending.clear();
      self.shared.metrics.open_iterations.fetch_sub(1, Ordering::Relaxed);
    }
  }
}

impl<'a, K, V, H> Drop for CacheIter<'a, K, V, H> {
  fn drop(&mut self) {
    self.close();
  }
}

impl<'a, K, V, H> fmt::Debug for CacheIter<'a, K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheIter")
      .field("next_shard", &self.next_shard)
      .field("pending", &self.pending.len())
      .field("open", &self.open)
      .finish()
  }
}
