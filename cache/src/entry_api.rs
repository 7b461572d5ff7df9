use crate::entry::{CacheEntry, EntryData, EntryState};
use crate::error::CacheError;
use crate::metrics::Metrics;
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::MutexGuard;

enum Mutation<V> {
  Set(V),
  Remove,
}

/// A view of one entry handed to [`Cache::invoke`](crate::Cache::invoke).
///
/// The closure runs while the entry's lock is held, so the read and the
/// mutation it decides on are atomic with respect to other operations on the
/// same key. Changes are applied after the closure returns; the last call to
/// [`set_value`](MutableEntry::set_value) or [`remove`](MutableEntry::remove)
/// wins.
pub struct MutableEntry<'a, K, V> {
  key: &'a K,
  current: Option<Arc<V>>,
  mutation: Option<Mutation<V>>,
}

impl<'a, K, V> MutableEntry<'a, K, V> {
  pub fn key(&self) -> &K {
    self.key
  }

  /// Whether a readable value was present when the closure started.
  pub fn exists(&self) -> bool {
    self.current.is_some()
  }

  /// The value present when the closure started.
  pub fn value(&self) -> Option<&Arc<V>> {
    self.current.as_ref()
  }

  pub fn set_value(&mut self, value: V) {
    self.mutation = Some(Mutation::Set(value));
  }

  pub fn remove(&mut self) {
    self.mutation = Some(Mutation::Remove);
  }
}

impl<'a, K: fmt::Debug, V> fmt::Debug for MutableEntry<'a, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutableEntry")
      .field("key", self.key)
      .field("exists", &self.exists())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Runs `op` on the entry for `key` under the entry lock and applies the
  /// mutation it asked for.
  ///
  /// A write never waits for a running load: an entry being fetched has no
  /// readable value, and writing one supersedes the load. Removing waits for
  /// the load to settle.
  pub(crate) fn invoke<R>(
    &self,
    key: &K,
    op: impl FnOnce(&mut MutableEntry<'_, K, V>) -> R,
  ) -> Result<R, CacheError> {
    loop {
      self.ensure_alive()?;
      let (entry, _) = self.store.get_or_create(key);
      let mut data = entry.lock();
      if data.detached {
        continue;
      }

      let now = Instant::now();
      let mut view = MutableEntry {
        key: &entry.key,
        current: data.readable(now).cloned(),
        mutation: None,
      };
      let result = op(&mut view);
      let MutableEntry { current, mutation, .. } = view;

      let mut inserted = false;
      match mutation {
        Some(Mutation::Set(value)) => {
          let superseded = data.is_loading();
          if superseded {
            data.episode += 1;
          }
          Metrics::incr(&self.metrics.puts);
          self.install_locked(&entry, &mut data, Arc::new(value), now, false);
          if superseded {
            entry.notify_settled();
          }
          inserted = true;
        }
        Some(Mutation::Remove) => {
          if data.is_loading() {
            // Decided on the state before the load; it settles first.
            Self::await_settled(&entry, &mut data);
          }
          if current.is_some() || data.readable(Instant::now()).is_some() {
            Metrics::incr(&self.metrics.removals);
          }
          self.detach_locked(&entry, &mut data);
        }
        None => {
          if data.state == EntryState::Creating {
            // Drop the placeholder this lookup may have inserted.
            self.detach_locked(&entry, &mut data);
          } else if data.is_due(now) {
            self.expire_locked(&entry, &mut data);
          }
        }
      }
      drop(data);

      if inserted {
        self.enforce_capacity();
      }
      return Ok(result);
    }
  }

  pub(crate) fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    self.invoke(&key, |entry| entry.set_value(value))
  }

  pub(crate) fn put_if_absent(&self, key: K, value: V) -> Result<bool, CacheError> {
    self.invoke(&key, |entry| {
      if entry.exists() {
        return false;
      }
      entry.set_value(value);
      true
    })
  }

  pub(crate) fn peek_and_put(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.invoke(&key, |entry| {
      let previous = entry.value().cloned();
      entry.set_value(value);
      previous
    })
  }

  pub(crate) fn replace(&self, key: K, value: V) -> Result<bool, CacheError> {
    self.invoke(&key, |entry| {
      if !entry.exists() {
        return false;
      }
      entry.set_value(value);
      true
    })
  }

  pub(crate) fn peek_and_replace(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
    self.invoke(&key, |entry| {
      let previous = entry.value().cloned();
      if previous.is_some() {
        entry.set_value(value);
      }
      previous
    })
  }

  pub(crate) fn replace_if_equals(&self, key: K, expected: &V, value: V) -> Result<bool, CacheError>
  where
    V: PartialEq,
  {
    self.invoke(&key, |entry| {
      if entry.value().is_some_and(|current| **current == *expected) {
        entry.set_value(value);
        return true;
      }
      false
    })
  }

  /// Blocks until no load runs on the entry. The slot stays in the store
  /// meanwhile, so no second load can start for the key.
  fn await_settled(entry: &CacheEntry<K, V>, data: &mut MutexGuard<'_, EntryData<V>>) {
    while data.is_loading() {
      let _ = entry.await_episode(data);
    }
  }

  /// Removes the entry for `key`. A load running for the key is awaited
  /// first, and what it installed is removed. Returns whether a readable value
  /// was removed.
  pub(crate) fn remove(&self, key: &K) -> Result<bool, CacheError> {
    self.ensure_alive()?;
    let Some(entry) = self.store.lookup(key) else {
      return Ok(false);
    };
    let mut data = entry.lock();
    Self::await_settled(&entry, &mut data);
    if data.detached {
      return Ok(false);
    }
    let removed = data.readable(Instant::now()).is_some();
    self.detach_locked(&entry, &mut data);
    if removed {
      Metrics::incr(&self.metrics.removals);
    }
    Ok(removed)
  }
}
