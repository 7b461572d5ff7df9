use crate::error::{CacheError, LoadError};
use crate::fetch::{FetchClaim, Loader};
use crate::metrics::Metrics;
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Instant;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
#[cfg(feature = "bulk")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::trace;

/// The outcome of [`Cache::get_all`](crate::Cache::get_all).
///
/// Holds exactly one slot per distinct requested key. A key whose load failed
/// holds its error; the error only surfaces when that key is read.
pub struct GetAllResult<K, V> {
  entries: HashMap<K, Result<Arc<V>, CacheError>>,
}

impl<K: Eq + Hash, V> GetAllResult<K, V> {
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.entries.contains_key(key)
  }

  /// The value for `key`, or the error its load produced. `None` if the key
  /// was not requested.
  pub fn get(&self, key: &K) -> Option<Result<Arc<V>, CacheError>> {
    self.entries.get(key).cloned()
  }

  pub fn keys(&self) -> impl Iterator<Item = &K> {
    self.entries.keys()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&K, &Result<Arc<V>, CacheError>)> {
    self.entries.iter()
  }

  /// Converts into a plain map, failing with the first error found.
  pub fn into_map(self) -> Result<HashMap<K, Arc<V>>, CacheError> {
    self
      .entries
      .into_iter()
      .map(|(key, result)| result.map(|value| (key, value)))
      .collect()
  }
}

impl<K: fmt::Debug, V> fmt::Debug for GetAllResult<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map()
      .entries(self.entries.iter().map(|(key, result)| (key, result.is_ok())))
      .finish()
  }
}

/// What a bulk caller found when it looked at one key of a chunk.
enum KeyClaim<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  Ready(Result<Arc<V>, CacheError>),
  Claimed(FetchClaim<K, V, H>),
  /// Someone else is loading the key.
  Busy,
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Loads a set of keys.
  ///
  /// Works chunk by chunk: every fetchable key of a chunk is claimed without
  /// waiting, the claims are loaded, and only then are the keys other callers
  /// were already loading awaited one by one. A bulk caller therefore never
  /// waits while holding claims of its own.
  pub(crate) fn get_all<I>(self: &Arc<Self>, keys: I) -> Result<GetAllResult<K, V>, CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.ensure_alive()?;
    let mut seen = HashSet::new();
    let keys: Vec<K> = keys
      .into_iter()
      .filter(|key| seen.insert(key.clone()))
      .collect();

    let mut entries = HashMap::with_capacity(keys.len());
    let Some(loader) = self.loader.clone() else {
      for key in keys {
        let result = self.get(&key);
        if result.as_ref().is_err_and(CacheError::is_destroyed) {
          return Err(CacheError::Destroyed);
        }
        entries.insert(key, result);
      }
      return Ok(GetAllResult { entries });
    };

    for chunk in keys.chunks(self.config.bulk_chunk_size) {
      let mut claims = Vec::new();
      let mut deferred = Vec::new();
      for key in chunk {
        match self.try_claim(key)? {
          KeyClaim::Ready(result) => {
            entries.insert(key.clone(), result);
          }
          KeyClaim::Claimed(claim) => claims.push(claim),
          KeyClaim::Busy => deferred.push(key),
        }
      }
      trace!(
        cache = self.config.label(),
        claimed = claims.len(),
        deferred = deferred.len(),
        "bulk chunk claimed"
      );

      for (key, result) in load_claims(claims, &loader) {
        entries.insert(key, result.map_err(CacheError::from));
      }
      for key in deferred {
        let result = self.get(key);
        if result.as_ref().is_err_and(CacheError::is_destroyed) {
          return Err(CacheError::Destroyed);
        }
        entries.insert(key.clone(), result);
      }
    }
    Ok(GetAllResult { entries })
  }

  fn try_claim(self: &Arc<Self>, key: &K) -> Result<KeyClaim<K, V, H>, CacheError> {
    loop {
      self.ensure_alive()?;
      let (entry, _) = self.store.get_or_create(key);
      let mut data = entry.lock();
      if data.detached {
        continue;
      }

      let now = Instant::now();
      if let Some(value) = self.readable_or_expire(&entry, &mut data, now) {
        data.refreshed = false;
        drop(data);
        self.record_hit(key);
        return Ok(KeyClaim::Ready(Ok(value)));
      }
      if data.detached {
        continue;
      }
      if data.is_loading() {
        return Ok(KeyClaim::Busy);
      }
      if let Some(failure) = data.failure().filter(|failure| now < failure.retry_at) {
        return Ok(KeyClaim::Ready(Err(failure.error.as_prior().into())));
      }

      Metrics::incr(&self.metrics.misses);
      let claim = FetchClaim::begin(self, &entry, &mut data, false);
      return Ok(KeyClaim::Claimed(claim));
    }
  }

  /// Removes the present keys as one set. All entries are locked together, in
  /// address order; entries that are being loaded are left alone.
  pub(crate) fn remove_all_at_once<I>(&self, keys: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.ensure_alive()?;
    let mut entries: Vec<_> = keys
      .into_iter()
      .filter_map(|key| self.store.lookup(&key))
      .collect();
    entries.sort_by_key(|entry| Arc::as_ptr(entry) as usize);
    entries.dedup_by(|a, b| Arc::ptr_eq(a, b));

    let mut guards: Vec<_> = entries.iter().map(|entry| entry.lock()).collect();
    let now = Instant::now();
    let mut removed = 0usize;
    let mut skipped = 0usize;
    for (entry, data) in entries.iter().zip(guards.iter_mut()) {
      if data.detached {
        continue;
      }
      if data.is_loading() {
        skipped += 1;
        continue;
      }
      if data.readable(now).is_some() {
        Metrics::incr(&self.metrics.removals);
        removed += 1;
      }
      self.detach_locked(entry, data);
    }
    drop(guards);

    trace!(cache = self.config.label(), removed, skipped, "bulk remove");
    Ok(())
  }

  /// Prefetches each key until the worker pool runs out of room.
  pub(crate) fn prefetch_all<I>(self: &Arc<Self>, keys: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    for key in keys {
      if !self.prefetch(&key)? {
        break;
      }
    }
    Ok(())
  }

  /// Prefetches `keys[start..end]`. A range outside the slice does nothing.
  pub(crate) fn prefetch_range(
    self: &Arc<Self>,
    keys: &[K],
    start: usize,
    end: usize,
  ) -> Result<(), CacheError> {
    self.ensure_alive()?;
    let Some(range) = keys.get(start..end) else {
      return Ok(());
    };
    for key in range {
      if !self.prefetch(key)? {
        break;
      }
    }
    Ok(())
  }
}

#[cfg(feature = "bulk")]
fn load_claims<K, V, H>(
  claims: Vec<FetchClaim<K, V, H>>,
  loader: &Loader<K, V>,
) -> Vec<(K, Result<Arc<V>, LoadError>)>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  claims
    .into_par_iter()
    .map(|claim| {
      let key = claim.key().clone();
      (key, claim.run(loader))
    })
    .collect()
}

#[cfg(not(feature = "bulk"))]
fn load_claims<K, V, H>(
  claims: Vec<FetchClaim<K, V, H>>,
  loader: &Loader<K, V>,
) -> Vec<(K, Result<Arc<V>, LoadError>)>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  claims
    .into_iter()
    .map(|claim| {
      let key = claim.key().clone();
      (key, claim.run(loader))
    })
    .collect()
}
