use crate::error::LoadError;
use crate::expiry::ExpiryTime;
use crate::task::timer::TimerHandle;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// The lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  /// Placeholder inserted by the first access that missed the store.
  Creating,
  /// The loader is running for this entry. Other callers wait.
  Fetching,
  /// Holds a readable value until its expiry.
  Valid,
  /// The last load failed; the error is kept on the entry.
  FetchFailed,
  /// A background reload is running; the old value may still be readable.
  Refreshing,
  /// Expired but kept (hidden) so the next load can see the previous value.
  Expired,
  /// Detached from the store. Never observed through the store.
  Removed,
}

/// A captured load failure and the earliest time `get` tries the loader again.
#[derive(Debug, Clone)]
pub(crate) struct CapturedFailure {
  pub(crate) error: LoadError,
  pub(crate) retry_at: Instant,
}

/// The result of one fetch episode, kept for the callers that awaited it.
pub(crate) struct Outcome<V> {
  pub(crate) episode: u64,
  pub(crate) result: Result<Arc<V>, LoadError>,
}

/// Mutable state of an entry, only touched under the entry mutex.
pub(crate) struct EntryData<V> {
  pub(crate) state: EntryState,
  pub(crate) value: Option<Arc<V>>,
  pub(crate) failure: Option<CapturedFailure>,
  pub(crate) expiry: ExpiryTime,
  pub(crate) last_modified: Option<Instant>,
  pub(crate) timer: Option<TimerHandle>,
  /// Bumped whenever a load starts or a mutation supersedes a running load.
  pub(crate) episode: u64,
  /// Number of callers blocked on the current episode.
  pub(crate) waiters: u32,
  pub(crate) outcome: Option<Outcome<V>>,
  /// Set once the entry is no longer reachable through the store.
  pub(crate) detached: bool,
  /// Whether the eviction policy is tracking this entry's key.
  pub(crate) admitted: bool,
  /// Set by a background refresh, cleared by the next read.
  pub(crate) refreshed: bool,
}

impl<V> EntryData<V> {
  #[inline]
  pub(crate) fn is_loading(&self) -> bool {
    matches!(self.state, EntryState::Fetching | EntryState::Refreshing)
  }

  /// The value, if it may be handed out at `now`.
  #[inline]
  pub(crate) fn readable(&self, now: Instant) -> Option<&Arc<V>> {
    match self.state {
      EntryState::Valid | EntryState::Refreshing if !self.expiry.has_passed(now) => self.value.as_ref(),
      _ => None,
    }
  }

  /// A valid entry whose expiry has passed but that no timer has handled yet.
  #[inline]
  pub(crate) fn is_due(&self, now: Instant) -> bool {
    self.state == EntryState::Valid && self.expiry.has_passed(now)
  }

  /// The view handed to an expiry policy as the entry being replaced.
  pub(crate) fn previous<K: Clone>(&self, key: &K) -> Option<CacheEntryView<K, V>> {
    let value = self.value.clone()?;
    let last_modified = self.last_modified?;
    Some(CacheEntryView {
      key: key.clone(),
      value,
      last_modified,
      expiry: self.expiry,
    })
  }

  /// The view of a readable entry.
  pub(crate) fn view<K: Clone>(&self, key: &K, now: Instant) -> Option<CacheEntryView<K, V>> {
    self.readable(now)?;
    self.previous(key)
  }

  /// The captured failure, or `None` once the entry was overwritten.
  pub(crate) fn failure(&self) -> Option<&CapturedFailure> {
    match self.state {
      EntryState::FetchFailed => self.failure.as_ref(),
      _ => None,
    }
  }
}

/// A slot in the store. All fields besides the key sit behind the entry mutex;
/// callers awaiting a fetch block on `settled`.
pub(crate) struct CacheEntry<K, V> {
  pub(crate) key: K,
  data: Mutex<EntryData<V>>,
  settled: Condvar,
}

impl<K, V> CacheEntry<K, V> {
  pub(crate) fn new(key: K) -> Self {
    Self {
      key,
      data: Mutex::new(EntryData {
        state: EntryState::Creating,
        value: None,
        failure: None,
        expiry: ExpiryTime::Never,
        last_modified: None,
        timer: None,
        episode: 0,
        waiters: 0,
        outcome: None,
        detached: false,
        admitted: false,
        refreshed: false,
      }),
      settled: Condvar::new(),
    }
  }

  #[inline]
  pub(crate) fn lock(&self) -> MutexGuard<'_, EntryData<V>> {
    self.data.lock()
  }

  /// Wakes every caller blocked in [`CacheEntry::await_episode`].
  #[inline]
  pub(crate) fn notify_settled(&self) {
    self.settled.notify_all();
  }

  /// Blocks until the fetch episode that is running now has ended.
  ///
  /// Returns the episode's result, or `None` when the episode was superseded
  /// by a mutation and the caller has to look at the entry again.
  pub(crate) fn await_episode(
    &self,
    data: &mut MutexGuard<'_, EntryData<V>>,
  ) -> Option<Result<Arc<V>, LoadError>> {
    let episode = data.episode;
    data.waiters += 1;
    while data.is_loading() && data.episode == episode {
      self.settled.wait(data);
    }
    data.waiters -= 1;

    let result = data
      .outcome
      .as_ref()
      .filter(|outcome| outcome.episode == episode)
      .map(|outcome| outcome.result.clone());
    if data.waiters == 0 {
      data.outcome = None;
    }
    result
  }
}

impl<K: fmt::Debug, V> fmt::Debug for CacheEntry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry").field("key", &self.key).finish_non_exhaustive()
  }
}

/// A read-only snapshot of one entry: key, value, last modification and expiry.
#[derive(Clone)]
pub struct CacheEntryView<K, V> {
  key: K,
  value: Arc<V>,
  last_modified: Instant,
  expiry: ExpiryTime,
}

impl<K, V> CacheEntryView<K, V> {
  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn value(&self) -> &Arc<V> {
    &self.value
  }

  /// When the value was last loaded or written.
  pub fn last_modified(&self) -> Instant {
    self.last_modified
  }

  pub fn expiry(&self) -> ExpiryTime {
    self.expiry
  }

  pub fn into_parts(self) -> (K, Arc<V>) {
    (self.key, self.value)
  }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntryView<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntryView")
      .field("key", &self.key)
      .field("value", &self.value)
      .field("expiry", &self.expiry)
      .finish()
  }
}
