use crate::entry::{CacheEntry, CacheEntryView, EntryData, EntryState, Outcome};
use crate::error::{AbandonedLoad, BoxError, CacheError, LoadError};
use crate::metrics::Metrics;
use crate::shared::CacheShared;
use crate::task::pool::Permit;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{trace, warn};

/// Computes the value for a key on a miss.
pub(crate) type Loader<K, V> = Arc<dyn Fn(&K) -> Result<V, BoxError> + Send + Sync>;

/// The right to run the loader for one entry.
///
/// Created while the entry lock is held, which moves the entry to `Fetching`
/// (or `Refreshing`). Running the claim calls the loader with no lock held and
/// publishes the result. A claim dropped without running, because the loader
/// panicked or a queued background load was abandoned, publishes a failure so
/// that nobody waits forever.
pub(crate) struct FetchClaim<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
  entry: Arc<CacheEntry<K, V>>,
  episode: u64,
  settled: bool,
}

impl<K, V, H> FetchClaim<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn begin(
    shared: &Arc<CacheShared<K, V, H>>,
    entry: &Arc<CacheEntry<K, V>>,
    data: &mut EntryData<V>,
    refresh: bool,
  ) -> Self {
    shared.cancel_timer(data);
    data.episode += 1;
    data.state = if refresh {
      EntryState::Refreshing
    } else {
      EntryState::Fetching
    };
    trace!(key = ?entry.key, episode = data.episode, refresh, "fetch claimed");

    Self {
      shared: shared.clone(),
      entry: entry.clone(),
      episode: data.episode,
      settled: false,
    }
  }

  pub(crate) fn key(&self) -> &K {
    &self.entry.key
  }

  pub(crate) fn run(mut self, loader: &Loader<K, V>) -> Result<Arc<V>, LoadError> {
    let result = loader(&self.entry.key);
    self.settled = true;
    self.shared.complete_fetch(&self.entry, self.episode, result)
  }
}

impl<K, V, H> Drop for FetchClaim<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    self.settled = true;
    let reason = if thread::panicking() {
      "loader panicked"
    } else {
      "load abandoned before completion"
    };
    warn!(key = ?self.entry.key, reason, "fetch did not complete");
    let _ = self
      .shared
      .complete_fetch(&self.entry, self.episode, Err(Box::new(AbandonedLoad(reason))));
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Publishes the result of fetch `episode` to its waiters, and installs it
  /// unless a mutation superseded the episode or the entry was detached.
  pub(crate) fn complete_fetch(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
    episode: u64,
    result: Result<V, BoxError>,
  ) -> Result<Arc<V>, LoadError> {
    let now = Instant::now();
    let outcome = result
      .map(Arc::new)
      .map_err(|source| LoadError::new(&entry.key, source));

    let mut data = entry.lock();
    let current = data.episode == episode && data.is_loading();
    // Waiters of a superseded episode have already left; a late completion
    // must not displace the outcome of the running one.
    if current && data.waiters > 0 {
      data.outcome = Some(Outcome {
        episode,
        result: outcome.clone(),
      });
    }

    if current {
      let refreshed = data.state == EntryState::Refreshing;
      match &outcome {
        Ok(value) => {
          Metrics::incr(&self.metrics.loads);
          if refreshed {
            Metrics::incr(&self.metrics.refreshes);
          }
          trace!(key = ?entry.key, episode, "fetch completed");
          self.install_locked(entry, &mut data, value.clone(), now, refreshed);
        }
        Err(error) => {
          Metrics::incr(&self.metrics.load_failures);
          warn!(key = ?entry.key, %error, "load failed");
          self.fail_locked(entry, &mut data, error.clone(), now);
        }
      }
    } else {
      trace!(key = ?entry.key, episode, "fetch superseded");
    }
    entry.notify_settled();
    drop(data);

    if current {
      self.enforce_capacity();
    }
    outcome
  }

  /// Returns the value for `key`, loading it if needed. Concurrent callers for
  /// the same key share one loader call.
  pub(crate) fn get(self: &Arc<Self>, key: &K) -> Result<Arc<V>, CacheError> {
    let Some(loader) = self.loader.clone() else {
      return match self.peek(key)? {
        Some(value) => {
          self.record_hit(key);
          Ok(value)
        }
        None => {
          Metrics::incr(&self.metrics.misses);
          Err(CacheError::loader_missing(key))
        }
      };
    };

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
        return Ok(value);
      }
      if data.detached {
        // Expired just now and removed; start over with a fresh entry.
        continue;
      }

      match data.state {
        EntryState::Fetching | EntryState::Refreshing => match entry.await_episode(&mut data) {
          Some(result) => {
            drop(data);
            if result.is_ok() {
              self.record_hit(key);
            }
            return result.map_err(CacheError::from);
          }
          None => continue,
        },
        EntryState::FetchFailed => {
          if let Some(failure) = data.failure().filter(|failure| now < failure.retry_at) {
            return Err(failure.error.as_prior().into());
          }
        }
        _ => {}
      }

      Metrics::incr(&self.metrics.misses);
      let claim = FetchClaim::begin(self, &entry, &mut data, false);
      drop(data);
      return claim.run(&loader).map_err(CacheError::from);
    }
  }

  /// The readable value for `key`, without loading. A captured load failure is
  /// returned as an error until the entry is overwritten.
  pub(crate) fn peek(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    self.ensure_alive()?;
    let Some(entry) = self.store.lookup(key) else {
      return Ok(None);
    };
    let mut data = entry.lock();
    if let Some(value) = self.readable_or_expire(&entry, &mut data, Instant::now()) {
      return Ok(Some(value));
    }
    match data.failure() {
      Some(failure) => Err(failure.error.as_prior().into()),
      None => Ok(None),
    }
  }

  pub(crate) fn peek_entry(&self, key: &K) -> Result<Option<CacheEntryView<K, V>>, CacheError> {
    self.ensure_alive()?;
    let Some(entry) = self.store.lookup(key) else {
      return Ok(None);
    };
    let mut data = entry.lock();
    let now = Instant::now();
    if self.readable_or_expire(&entry, &mut data, now).is_some() {
      return Ok(data.view(&entry.key, now));
    }
    match data.failure() {
      Some(failure) => Err(failure.error.as_prior().into()),
      None => Ok(None),
    }
  }

  pub(crate) fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
    self.ensure_alive()?;
    let Some(entry) = self.store.lookup(key) else {
      return Ok(false);
    };
    let mut data = entry.lock();
    Ok(self.readable_or_expire(&entry, &mut data, Instant::now()).is_some())
  }

  /// Starts a background load for `key` unless it is readable or already
  /// loading. Never blocks. Returns `false` when the worker pool had no room,
  /// in which case nothing was done.
  pub(crate) fn prefetch(self: &Arc<Self>, key: &K) -> Result<bool, CacheError> {
    self.ensure_alive()?;
    if self.loader.is_none() {
      return Ok(true);
    }
    let Some(permit) = self.pool.try_acquire() else {
      Metrics::incr(&self.metrics.prefetches_dropped);
      return Ok(false);
    };

    loop {
      let (entry, _) = self.store.get_or_create(key);
      let mut data = entry.lock();
      if data.detached {
        continue;
      }

      let now = Instant::now();
      if data.is_loading() || self.readable_or_expire(&entry, &mut data, now).is_some() {
        return Ok(true);
      }
      if data.detached {
        continue;
      }
      if data.failure().is_some_and(|failure| now < failure.retry_at) {
        return Ok(true);
      }

      Metrics::incr(&self.metrics.prefetches);
      let claim = FetchClaim::begin(self, &entry, &mut data, false);
      drop(data);
      self.submit_load(permit, claim);
      return Ok(true);
    }
  }

  /// Hands a claimed load to the worker pool. Must be called without the
  /// entry lock: a rejected job publishes its failure on the spot.
  pub(crate) fn submit_load(&self, permit: Permit, claim: FetchClaim<K, V, H>) {
    let Some(loader) = self.loader.clone() else {
      return;
    };
    let submitted = self.pool.submit(permit, move || {
      let _ = claim.run(&loader);
    });
    if !submitted {
      trace!(cache = self.config.label(), "background load rejected, pool is closed");
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::builder::CacheBuilder;
  use crate::entry::EntryState;
  use std::io;

  #[test]
  fn late_superseded_completion_keeps_current_outcome() {
    let cache = CacheBuilder::<i32, i32>::new().build().unwrap();
    let shared = &cache.shared;
    let (entry, _) = shared.store.get_or_create(&1);
    {
      let mut data = entry.lock();
      data.state = EntryState::Fetching;
      data.episode = 3;
      data.waiters = 1;
    }

    // Episode 3 fails while one caller waits for it.
    let failed = shared.complete_fetch(&entry, 3, Err(Box::new(io::Error::other("down"))));
    assert!(failed.is_err());

    // A load from an episode superseded long ago finishes afterwards.
    let late = shared.complete_fetch(&entry, 1, Ok(7));
    assert_eq!(*late.unwrap(), 7);

    let data = entry.lock();
    let outcome = data.outcome.as_ref().unwrap();
    assert_eq!(outcome.episode, 3);
    assert!(outcome.result.is_err());
    assert_eq!(data.state, EntryState::FetchFailed);
    assert!(data.value.is_none());
  }

  #[test]
  fn completion_without_waiters_stores_no_outcome() {
    let cache = CacheBuilder::<i32, i32>::new().build().unwrap();
    let shared = &cache.shared;
    let (entry, _) = shared.store.get_or_create(&2);
    {
      let mut data = entry.lock();
      data.state = EntryState::Fetching;
      data.episode = 1;
    }

    assert_eq!(*shared.complete_fetch(&entry, 1, Ok(20)).unwrap(), 20);
    let data = entry.lock();
    assert!(data.outcome.is_none());
    assert_eq!(data.state, EntryState::Valid);
  }
}
