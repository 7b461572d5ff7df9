use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The error type a loader returns. Any `Send + Sync` error can be boxed into it.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An error that can occur when building a cache from its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The capacity was zero.
  #[error("cache capacity cannot be zero")]
  ZeroCapacity,
  /// The number of shards was zero.
  #[error("number of shards cannot be zero")]
  ZeroShards,
  /// The bulk chunk size was zero.
  #[error("bulk chunk size cannot be zero")]
  ZeroChunkSize,
  /// No threads were granted to run background loads.
  #[error("at least one loader thread is required")]
  ZeroLoaderThreads,
  /// The lagging timer granularity was zero.
  #[error("timer lag cannot be zero")]
  ZeroTimerLag,
  /// The operating system refused to start a background thread.
  #[error("failed to spawn background thread: {0}")]
  ThreadSpawn(String),
}

/// Tells whether a load failure happened while serving the current call, or
/// was captured earlier and is being surfaced again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
  /// The loader failed during the episode this call started or awaited.
  ThisCall,
  /// The failure was captured by an earlier fetch and is still on the entry.
  Prior,
}

impl fmt::Display for FailureOrigin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureOrigin::ThisCall => f.write_str("during this call"),
      FailureOrigin::Prior => f.write_str("in a prior fetch"),
    }
  }
}

/// A captured loader failure.
///
/// The same `LoadError` is handed to every caller that awaited the failed fetch,
/// so the underlying error is shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
#[error("loading key {key} failed {origin}: {source}")]
pub struct LoadError {
  key: String,
  origin: FailureOrigin,
  source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl LoadError {
  pub(crate) fn new<K: fmt::Debug>(key: &K, source: BoxError) -> Self {
    Self {
      key: format!("{key:?}"),
      origin: FailureOrigin::ThisCall,
      source: Arc::from(source),
    }
  }

  /// Returns a copy of this error marked as surfaced from an earlier fetch.
  pub(crate) fn as_prior(&self) -> Self {
    Self {
      origin: FailureOrigin::Prior,
      ..self.clone()
    }
  }

  /// The `Debug` rendering of the key whose load failed.
  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn origin(&self) -> FailureOrigin {
    self.origin
  }

  /// The error the loader returned.
  pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.source
  }
}

/// An error returned by cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The loader failed for the requested key.
  #[error(transparent)]
  Load(#[from] LoadError),
  /// A miss had to be fetched but the cache has no loader.
  #[error("no loader configured to fetch key {key}")]
  LoaderMissing { key: String },
  /// The cache was destroyed. Non-recoverable.
  #[error("cache has been destroyed")]
  Destroyed,
}

impl CacheError {
  pub(crate) fn loader_missing<K: fmt::Debug>(key: &K) -> Self {
    CacheError::LoaderMissing {
      key: format!("{key:?}"),
    }
  }

  /// Returns the captured load failure, if this is one.
  pub fn as_load_error(&self) -> Option<&LoadError> {
    match self {
      CacheError::Load(err) => Some(err),
      _ => None,
    }
  }

  pub fn is_destroyed(&self) -> bool {
    matches!(self, CacheError::Destroyed)
  }
}

/// Stands in for a loader result that never arrived: the loader panicked, or a
/// queued background load was dropped when the cache shut down.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct AbandonedLoad(pub(crate) &'static str);
