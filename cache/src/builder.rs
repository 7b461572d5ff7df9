use crate::config::CacheConfig;
use crate::entry::CacheEntryView;
use crate::error::{BoxError, BuildError};
use crate::expiry::{self, ExpiryPolicy, ExpiryTime};
use crate::fetch::Loader;
use crate::handles::Cache;
use crate::policy::clock::ClockPolicy;
use crate::policy::EvictionPolicy;
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A builder for creating [`Cache`] instances.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  config: CacheConfig,
  hasher: H,
  loader: Option<Loader<K, V>>,
  expiry_policy: Option<ExpiryPolicy<K, V>>,
  eviction_policy: Option<Box<dyn EvictionPolicy<K>>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("config", &self.config)
      .field("has_loader", &self.loader.is_some())
      .field("has_expiry_policy", &self.expiry_policy.is_some())
      .field("has_eviction_policy", &self.eviction_policy.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
// This impl block has no restrictive bounds on K or V.
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Replaces every setting with the ones in `config`.
  pub fn config(mut self, config: CacheConfig) -> Self {
    self.config = config;
    self
  }

  /// Names the cache. The name shows up in thread names and log fields.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.config.name = Some(name.into());
    self
  }

  /// Sets the maximum number of entries.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.config.capacity = capacity;
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    self.config.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Values expire `duration` after they were loaded or written. A zero
  /// duration disables caching: values are handed out but never kept.
  pub fn expire_after_write(mut self, duration: Duration) -> Self {
    self.config.expire_after_write = Some(duration);
    self
  }

  /// Values never expire. This is the default.
  pub fn eternal(mut self) -> Self {
    self.config.expire_after_write = None;
    self
  }

  /// Never hand out a value at or after its expiry instant.
  pub fn sharp_expiry(mut self, enabled: bool) -> Self {
    self.config.sharp_expiry = enabled;
    self
  }

  /// Keep expired entries, hidden, so the next load sees the previous value.
  pub fn keep_data_after_expired(mut self, enabled: bool) -> Self {
    self.config.keep_data_after_expired = enabled;
    self
  }

  pub fn sharp_expiry_safety_gap(mut self, gap: Duration) -> Self {
    self.config.sharp_expiry_safety_gap = gap;
    self
  }

  /// Sets the granularity of lagging expiry timers.
  pub fn timer_lag(mut self, lag: Duration) -> Self {
    self.config.timer_lag = lag;
    self
  }

  /// Reload values in the background when they are about to expire.
  ///
  /// Requires a loader. An entry that was refreshed but not read again is
  /// left to expire at its next deadline.
  pub fn refresh_ahead(mut self, enabled: bool) -> Self {
    self.config.refresh_ahead = enabled;
    self
  }

  /// How long a load failure is returned to `get` before the loader is tried
  /// again. Defaults to zero: every `get` retries.
  pub fn retry_interval(mut self, interval: Duration) -> Self {
    self.config.retry_interval = interval;
    self
  }

  /// Number of threads running prefetch and refresh loads.
  pub fn loader_threads(mut self, threads: usize) -> Self {
    self.config.loader_threads = threads;
    self
  }

  /// Number of background loads that may queue for a free loader thread.
  pub fn prefetch_queue(mut self, len: usize) -> Self {
    self.config.prefetch_queue = len;
    self
  }

  /// Number of keys `get_all` claims at once.
  pub fn bulk_chunk_size(mut self, size: usize) -> Self {
    self.config.bulk_chunk_size = size;
    self
  }

  /// Sets the loader called on a miss.
  ///
  /// The loader runs without any cache lock held. An error it returns is
  /// captured on the entry and handed to every caller waiting for the load.
  pub fn loader<F, E>(mut self, loader: F) -> Self
  where
    K: 'static,
    V: 'static,
    F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    E: Into<BoxError>,
  {
    let loader: Loader<K, V> =
      Arc::new(move |key: &K| -> Result<V, BoxError> { loader(key).map_err(Into::into) });
    self.loader = Some(loader);
    self
  }

  /// Sets a custom expiry policy, replacing the one derived from
  /// `expire_after_write`.
  ///
  /// The policy receives the key, the new value, the time it was loaded or
  /// written, and the entry being replaced if it held a value.
  pub fn expiry_policy<F>(mut self, policy: F) -> Self
  where
    K: 'static,
    V: 'static,
    F: Fn(&K, &V, Instant, Option<&CacheEntryView<K, V>>) -> ExpiryTime + Send + Sync + 'static,
  {
    let policy: ExpiryPolicy<K, V> = Arc::new(policy);
    self.expiry_policy = Some(policy);
    self
  }

  /// Sets a custom eviction policy.
  ///
  /// By default, the cache uses a [`ClockPolicy`].
  pub fn eviction_policy<P>(mut self, policy: P) -> Self
  where
    K: 'static,
    P: EvictionPolicy<K> + 'static,
  {
    let policy: Box<dyn EvictionPolicy<K>> = Box::new(policy);
    self.eviction_policy = Some(policy);
    self
  }

  /// Sets the hasher for the cache.
  pub fn hasher<S>(self, hasher: S) -> CacheBuilder<K, V, S> {
    CacheBuilder {
      config: self.config,
      hasher,
      loader: self.loader,
      expiry_policy: self.expiry_policy,
      eviction_policy: self.eviction_policy,
    }
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self::from_config(CacheConfig::default())
  }

  /// Creates a builder starting from an existing configuration.
  pub fn from_config(config: CacheConfig) -> Self {
    Self {
      config,
      hasher: H::default(),
      loader: None,
      expiry_policy: None,
      eviction_policy: None,
    }
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Validates the configuration, starts the background threads and returns
  /// the cache.
  pub fn build(self) -> Result<Cache<K, V, H>, BuildError> {
    self.config.validate()?;
    let expiry_policy = self
      .expiry_policy
      .unwrap_or_else(|| expiry::after_write_policy(&self.config));
    let eviction_policy: Box<dyn EvictionPolicy<K>> = match self.eviction_policy {
      Some(policy) => policy,
      None => Box::new(ClockPolicy::new()),
    };

    let shared = CacheShared::new(
      self.config,
      self.hasher,
      self.loader,
      expiry_policy,
      eviction_policy,
    )?;
    Ok(Cache::from_shared(shared))
  }
}
