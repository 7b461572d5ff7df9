use crate::error::BuildError;

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 2000;

/// Default lead time of the sharp-expiry timer before the exact expiry instant.
pub const DEFAULT_SAFETY_GAP: Duration = Duration::from_millis(27);

/// Default slot width for lagging expiry timers.
pub const DEFAULT_TIMER_LAG: Duration = Duration::from_millis(100);

pub const DEFAULT_PREFETCH_QUEUE: usize = 64;

pub const DEFAULT_BULK_CHUNK_SIZE: usize = 64;

/// The tunable settings of a cache.
///
/// A `CacheConfig` is plain data: it can be built in code, taken from
/// `Default`, or deserialized by an outer configuration layer (with the
/// `serde` feature). Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CacheConfig {
  /// Optional name, used for background thread names and log fields.
  pub name: Option<String>,
  /// Maximum number of entries before eviction kicks in.
  pub capacity: usize,
  /// Number of independently locked store shards.
  pub shards: usize,
  /// Lifetime of a value after it was loaded or written. `None` means values
  /// never expire; a zero duration means values are not cached at all.
  pub expire_after_write: Option<Duration>,
  /// When set, a value is never readable at or after its expiry instant.
  pub sharp_expiry: bool,
  /// Keep expired entries (hidden) so the next load can see the previous value.
  pub keep_data_after_expired: bool,
  /// How long before the exact expiry the sharp-expiry timer is scheduled.
  pub sharp_expiry_safety_gap: Duration,
  /// Slot width that lagging expiry timers are rounded up to.
  pub timer_lag: Duration,
  /// Reload values in the background when their expiry timer fires.
  pub refresh_ahead: bool,
  /// How long a captured load failure is served to `get` before the loader
  /// is tried again.
  pub retry_interval: Duration,
  /// Number of threads running prefetch and refresh loads.
  pub loader_threads: usize,
  /// Number of background loads that may wait for a free loader thread.
  pub prefetch_queue: usize,
  /// Number of keys claimed at once by `get_all`.
  pub bulk_chunk_size: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let cpus = num_cpus::get().max(1);
    Self {
      name: None,
      capacity: DEFAULT_CAPACITY,
      shards: (cpus * 4).next_power_of_two(),
      expire_after_write: None,
      sharp_expiry: false,
      keep_data_after_expired: false,
      sharp_expiry_safety_gap: DEFAULT_SAFETY_GAP,
      timer_lag: DEFAULT_TIMER_LAG,
      refresh_ahead: false,
      retry_interval: Duration::ZERO,
      loader_threads: cpus,
      prefetch_queue: DEFAULT_PREFETCH_QUEUE,
      bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
    }
  }
}

impl CacheConfig {
  /// Checks the configuration for values the cache cannot run with.
  pub fn validate(&self) -> Result<(), BuildError> {
    if self.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.bulk_chunk_size == 0 {
      return Err(BuildError::ZeroChunkSize);
    }
    if self.loader_threads == 0 {
      return Err(BuildError::ZeroLoaderThreads);
    }
    if self.timer_lag.is_zero() {
      return Err(BuildError::ZeroTimerLag);
    }
    Ok(())
  }

  /// The label used in thread names and log fields.
  pub(crate) fn label(&self) -> &str {
    self.name.as_deref().unwrap_or("strand-cache")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = CacheConfig::default();
    assert_eq!(config.capacity, DEFAULT_CAPACITY);
    assert!(config.shards.is_power_of_two());
    assert_eq!(config.expire_after_write, None);
    assert_eq!(config.sharp_expiry_safety_gap, Duration::from_millis(27));
    assert!(config.validate().is_ok());
  }

  #[test]
  fn validate_rejects_zero_values() {
    fn check(mutate: impl FnOnce(&mut CacheConfig), expected: BuildError) {
      let mut config = CacheConfig::default();
      mutate(&mut config);
      assert_eq!(config.validate(), Err(expected));
    }

    check(|c| c.capacity = 0, BuildError::ZeroCapacity);
    check(|c| c.shards = 0, BuildError::ZeroShards);
    check(|c| c.bulk_chunk_size = 0, BuildError::ZeroChunkSize);
    check(|c| c.loader_threads = 0, BuildError::ZeroLoaderThreads);
    check(|c| c.timer_lag = Duration::ZERO, BuildError::ZeroTimerLag);
  }

  #[cfg(feature = "serde")]
  #[test]
  fn partial_document_fills_in_defaults() {
    let json = r#"{
      "name": "users",
      "capacity": 10,
      "sharp_expiry": true,
      "expire_after_write": { "secs": 2, "nanos": 0 }
    }"#;
    let config: CacheConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.name.as_deref(), Some("users"));
    assert_eq!(config.capacity, 10);
    assert!(config.sharp_expiry);
    assert_eq!(config.expire_after_write, Some(Duration::from_secs(2)));
    assert_eq!(config.timer_lag, DEFAULT_TIMER_LAG);
    assert_eq!(config.bulk_chunk_size, DEFAULT_BULK_CHUNK_SIZE);
  }
}
