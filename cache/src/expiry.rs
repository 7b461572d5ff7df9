use crate::config::CacheConfig;
use crate::entry::CacheEntryView;
use crate::time;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// When a freshly loaded or written value stops being readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryTime {
  /// The value never expires.
  Never,
  /// The value is expired immediately; it is handed to the caller but not cached.
  Now,
  /// The value expires at the given instant.
  At(Instant),
}

impl ExpiryTime {
  /// Expiry `ttl` after `load_time`. A zero `ttl` means [`ExpiryTime::Now`].
  pub fn after(load_time: Instant, ttl: Duration) -> Self {
    if ttl.is_zero() {
      return ExpiryTime::Now;
    }
    match load_time.checked_add(ttl) {
      Some(at) => ExpiryTime::At(at),
      None => ExpiryTime::Never,
    }
  }

  #[inline]
  pub fn has_passed(&self, now: Instant) -> bool {
    match self {
      ExpiryTime::Never => false,
      ExpiryTime::Now => true,
      ExpiryTime::At(at) => now >= *at,
    }
  }

  pub fn instant(&self) -> Option<Instant> {
    match self {
      ExpiryTime::At(at) => Some(*at),
      _ => None,
    }
  }
}

/// Computes the expiry of a value from its key, the value, the time it was
/// loaded or written, and the entry it replaces (if that entry held a value).
pub type ExpiryPolicy<K, V> =
  Arc<dyn Fn(&K, &V, Instant, Option<&CacheEntryView<K, V>>) -> ExpiryTime + Send + Sync>;

/// The expiry policy derived from `expire_after_write`.
pub(crate) fn after_write_policy<K: 'static, V: 'static>(config: &CacheConfig) -> ExpiryPolicy<K, V> {
  let ttl = config.expire_after_write;
  Arc::new(
    move |_: &K, _: &V, load_time: Instant, _: Option<&CacheEntryView<K, V>>| match ttl {
      Some(ttl) => ExpiryTime::after(load_time, ttl),
      None => ExpiryTime::Never,
    },
  )
}

/// Picks the instant the timer for an entry expiring at `expires_at` fires.
///
/// Sharp expiry fires a safety gap early and re-arms for the exact instant if
/// the entry is still valid. Lagging expiry rounds up to the timer lag so the
/// entry is removed at most one slot late. With refresh-ahead the timer fires
/// early so the reload can finish before the old value becomes unreadable.
pub(crate) fn timer_deadline(expires_at: Instant, config: &CacheConfig, refresh: bool) -> Instant {
  let lead = if config.sharp_expiry {
    Some(config.sharp_expiry_safety_gap)
  } else if refresh {
    Some(config.timer_lag)
  } else {
    None
  };

  match lead {
    Some(lead) => expires_at.checked_sub(lead).unwrap_or(expires_at),
    None => time::round_up(expires_at, config.timer_lag),
  }
}
