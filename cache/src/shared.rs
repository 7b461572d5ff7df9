use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CapturedFailure, EntryData, EntryState};
use crate::error::{BuildError, CacheError, LoadError};
use crate::expiry::{self, ExpiryPolicy, ExpiryTime};
use crate::fetch::{FetchClaim, Loader};
use crate::metrics::Metrics;
use crate::policy::EvictionPolicy;
use crate::store::ShardedStore;
use crate::task::access_batcher::AccessBatcher;
use crate::task::janitor::{Janitor, TimerTarget};
use crate::task::pool::WorkerPool;
use crate::task::timer::{TimerHandle, TimerQueue};

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Upper bound on evict-then-recheck rounds after one insertion. Rounds only
/// repeat when victims were busy loading and had to be kept.
const MAX_EVICTION_ROUNDS: usize = 4;

/// The state shared by the cache handle, the janitor and the worker pool.
///
/// Lock order is entry, then shard, then policy. Nothing that holds a shard or
/// policy lock ever takes an entry lock. Hit stripes are leaf locks: nothing
/// else is locked while one is held.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) config: CacheConfig,
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) policy: Box<dyn EvictionPolicy<K>>,
  accesses: AccessBatcher<K>,
  pub(crate) timers: Arc<TimerQueue<K>>,
  pub(crate) janitor: Mutex<Option<Janitor>>,
  pub(crate) pool: WorkerPool,
  pub(crate) loader: Option<Loader<K, V>>,
  pub(crate) expiry_policy: ExpiryPolicy<K, V>,
  pub(crate) metrics: Metrics,
  destroyed: AtomicBool,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("name", &self.config.label())
      .field("capacity", &self.config.capacity)
      .field("has_loader", &self.loader.is_some())
      .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
      .finish()
  }
}

impl<K, V, H> CacheShared<K, V, H> {
  #[inline]
  pub(crate) fn is_destroyed(&self) -> bool {
    self.destroyed.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn ensure_alive(&self) -> Result<(), CacheError> {
    if self.is_destroyed() {
      Err(CacheError::Destroyed)
    } else {
      Ok(())
    }
  }

  #[inline]
  pub(crate) fn cancel_timer(&self, data: &mut EntryData<V>) {
    if let Some(handle) = data.timer.take() {
      self.timers.cancel(handle);
    }
  }

  /// Whether expiring entries are reloaded in the background.
  #[inline]
  pub(crate) fn refreshes_ahead(&self) -> bool {
    self.config.refresh_ahead && self.loader.is_some()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    config: CacheConfig,
    hasher: H,
    loader: Option<Loader<K, V>>,
    expiry_policy: ExpiryPolicy<K, V>,
    policy: Box<dyn EvictionPolicy<K>>,
  ) -> Result<Arc<Self>, BuildError> {
    let threads = if loader.is_some() { config.loader_threads } else { 0 };
    let pool = WorkerPool::new(config.label(), threads, config.prefetch_queue)?;
    let timers = Arc::new(TimerQueue::new());

    let shared = Arc::new(Self {
      store: ShardedStore::new(config.shards, hasher),
      policy,
      accesses: AccessBatcher::new(),
      timers: timers.clone(),
      janitor: Mutex::new(None),
      pool,
      loader,
      expiry_policy,
      metrics: Metrics::new(),
      destroyed: AtomicBool::new(false),
      config,
    });

    match Janitor::spawn(shared.config.label(), timers, Arc::downgrade(&shared)) {
      Ok(janitor) => *shared.janitor.lock() = Some(janitor),
      Err(e) => {
        shared.shutdown();
        return Err(e);
      }
    }

    debug!(
      cache = shared.config.label(),
      capacity = shared.config.capacity,
      shards = shared.config.shards,
      sharp_expiry = shared.config.sharp_expiry,
      "cache built"
    );
    Ok(shared)
  }

  /// Counts a hit and buffers it for the eviction policy. Only the reader that
  /// fills a stripe touches the policy lock.
  pub(crate) fn record_hit(&self, key: &K) {
    Metrics::incr(&self.metrics.hits);
    if self.accesses.record(self.store.hash(key), key) {
      self.apply_accesses();
    }
  }

  /// Hands the buffered hits to the eviction policy.
  fn apply_accesses(&self) {
    let batch = self.accesses.drain();
    if !batch.is_empty() {
      self.policy.on_access_batch(&batch);
    }
  }

  /// The value readable at `now`. A valid entry found past its expiry is
  /// expired on the spot, which may detach it.
  pub(crate) fn readable_or_expire(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
    data: &mut EntryData<V>,
    now: Instant,
  ) -> Option<Arc<V>> {
    if let Some(value) = data.readable(now) {
      return Some(value.clone());
    }
    if data.is_due(now) {
      self.expire_locked(entry, data);
    }
    None
  }

  pub(crate) fn expire_locked(&self, entry: &Arc<CacheEntry<K, V>>, data: &mut EntryData<V>) {
    Metrics::incr(&self.metrics.expired);
    trace!(key = ?entry.key, "entry expired");
    if self.config.keep_data_after_expired {
      self.cancel_timer(data);
      data.state = EntryState::Expired;
    } else {
      self.detach_locked(entry, data);
    }
  }

  /// Takes the entry out of the store and out of the eviction policy. A load
  /// still running completes against the detached entry and is not installed.
  pub(crate) fn detach_locked(&self, entry: &Arc<CacheEntry<K, V>>, data: &mut EntryData<V>) {
    if data.detached {
      return;
    }
    self.cancel_timer(data);
    // Forget the key before the slot frees up, so a successor entry for the
    // same key cannot be admitted first.
    if data.admitted {
      self.policy.on_remove(&entry.key);
      data.admitted = false;
    }
    self.store.remove_if_same(entry);
    data.detached = true;
    if !data.is_loading() {
      data.state = EntryState::Removed;
    }
  }

  fn admit_locked(&self, entry: &Arc<CacheEntry<K, V>>, data: &mut EntryData<V>) {
    if data.detached {
      return;
    }
    // Earlier hits first, so the policy sees them in order with this write.
    self.apply_accesses();
    if data.admitted {
      self.policy.on_access(&entry.key);
    } else {
      self.policy.on_admit(&entry.key);
      data.admitted = true;
    }
  }

  /// Installs a value that was loaded or written at `now`, computes its expiry
  /// and arms its timer.
  pub(crate) fn install_locked(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
    data: &mut EntryData<V>,
    value: Arc<V>,
    now: Instant,
    refreshed: bool,
  ) {
    let expiry = {
      let previous = data.previous(&entry.key);
      (self.expiry_policy)(&entry.key, &value, now, previous.as_ref())
    };

    self.cancel_timer(data);
    data.value = Some(value);
    data.failure = None;
    data.last_modified = Some(now);
    data.expiry = expiry;
    data.refreshed = refreshed;
    if data.detached {
      data.state = EntryState::Removed;
      return;
    }
    data.state = EntryState::Valid;
    self.admit_locked(entry, data);
    self.arm_locked(entry, data, now);
  }

  /// Records a failed load. The entry keeps its slot so the failure can be
  /// surfaced again.
  pub(crate) fn fail_locked(
    &self,
    entry: &Arc<CacheEntry<K, V>>,
    data: &mut EntryData<V>,
    error: LoadError,
    now: Instant,
  ) {
    self.cancel_timer(data);
    let retry_at = now.checked_add(self.config.retry_interval).unwrap_or(now);
    data.failure = Some(CapturedFailure { error, retry_at });
    data.refreshed = false;
    if data.detached {
      data.state = EntryState::Removed;
      return;
    }
    data.state = EntryState::FetchFailed;
    self.admit_locked(entry, data);
  }

  fn arm_locked(&self, entry: &Arc<CacheEntry<K, V>>, data: &mut EntryData<V>, now: Instant) {
    match data.expiry {
      ExpiryTime::Never => {}
      ExpiryTime::At(at) if at > now => {
        let deadline = expiry::timer_deadline(at, &self.config, self.refreshes_ahead());
        data.timer = Some(self.timers.schedule(entry.key.clone(), deadline));
      }
      _ => self.expire_locked(entry, data),
    }
  }

  /// Evicts until the store is back within capacity. Called after an
  /// insertion, with no entry lock held.
  pub(crate) fn enforce_capacity(&self) {
    let capacity = self.config.capacity;
    for _ in 0..MAX_EVICTION_ROUNDS {
      let len = self.store.len();
      if len <= capacity {
        return;
      }
      let victims = self.policy.evict(len - capacity);
      if victims.is_empty() {
        return;
      }

      let mut evicted = 0usize;
      let mut kept = 0usize;
      for key in victims {
        let Some(entry) = self.store.lookup(&key) else {
          continue;
        };
        let mut data = entry.lock();
        if !data.admitted || data.detached {
          continue;
        }
        if data.is_loading() {
          self.policy.on_admit(&key);
          kept += 1;
          continue;
        }
        // The policy already dropped the key.
        data.admitted = false;
        self.detach_locked(&entry, &mut data);
        Metrics::incr(&self.metrics.evicted);
        evicted += 1;
      }
      debug!(cache = self.config.label(), evicted, kept, "eviction round");
      if kept == 0 {
        return;
      }
    }
  }

  /// Detaches every entry. Loads still running finish against their detached
  /// entries and are handed to their own callers only.
  pub(crate) fn detach_all(&self) -> usize {
    let entries = self.store.clear(|| self.policy.clear());
    for entry in &entries {
      let mut data = entry.lock();
      self.cancel_timer(&mut data);
      data.detached = true;
      data.admitted = false;
      if !data.is_loading() {
        data.state = EntryState::Removed;
      }
    }
    entries.len()
  }

  pub(crate) fn clear(&self) -> Result<(), CacheError> {
    self.ensure_alive()?;
    let count = self.detach_all();
    debug!(cache = self.config.label(), entries = count, "cache cleared");
    Ok(())
  }

  /// Stops the janitor and the worker pool, then detaches every entry.
  /// Only the first call does anything.
  pub(crate) fn shutdown(&self) {
    if self.destroyed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.timers.stop();
    let janitor = self.janitor.lock().take();
    if let Some(janitor) = janitor {
      janitor.join();
    }
    self.pool.shutdown();
    let count = self.detach_all();
    debug!(cache = self.config.label(), entries = count, "cache destroyed");
  }
}

impl<K, V, H> TimerTarget<K> for CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn on_timer(self: Arc<Self>, key: K, handle: TimerHandle) {
    let Some(entry) = self.store.lookup(&key) else {
      return;
    };
    let mut data = entry.lock();
    if data.timer != Some(handle) {
      return;
    }
    data.timer = None;
    if data.state != EntryState::Valid {
      return;
    }
    trace!(key = ?key, "expiry timer fired");

    // Entries nobody read since their last refresh are left to expire.
    if self.refreshes_ahead() && !data.refreshed {
      if let Some(permit) = self.pool.try_acquire() {
        let claim = FetchClaim::begin(&self, &entry, &mut data, true);
        drop(data);
        self.submit_load(permit, claim);
        return;
      }
    }

    let now = Instant::now();
    if data.expiry.has_passed(now) {
      self.expire_locked(&entry, &mut data);
    } else if let Some(at) = data.expiry.instant() {
      // Sharp or refresh timers fire early; come back at the exact instant.
      data.timer = Some(self.timers.schedule(key, at));
    }
  }
}
