use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single reference point timer deadlines are aligned against.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts an `Instant` into a `Duration` since the cache's epoch.
#[inline]
pub(crate) fn instant_to_duration(instant: Instant) -> Duration {
  instant.saturating_duration_since(*CACHE_EPOCH)
}

/// Converts a `Duration` from the cache's epoch back into an `Instant`.
#[inline]
pub(crate) fn duration_to_instant(duration: Duration) -> Instant {
  *CACHE_EPOCH + duration
}

/// Rounds `instant` up to the next multiple of `granularity` since the epoch.
///
/// Lagging expiry uses this so that entries expiring close together share a
/// timer slot. An instant already on a slot boundary is returned unchanged.
pub(crate) fn round_up(instant: Instant, granularity: Duration) -> Instant {
  let step = granularity.as_nanos();
  if step == 0 {
    return instant;
  }
  let since = instant_to_duration(instant).as_nanos();
  let slots = since.div_ceil(step);
  let rounded = slots.saturating_mul(step);
  let secs = (rounded / 1_000_000_000) as u64;
  let nanos = (rounded % 1_000_000_000) as u32;
  duration_to_instant(Duration::new(secs, nanos)).max(instant)
}
