use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// Internal counters, updated without locks.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Loader ---
  pub(crate) loads: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,
  pub(crate) refreshes: CachePadded<AtomicU64>,
  pub(crate) prefetches: CachePadded<AtomicU64>,
  pub(crate) prefetches_dropped: CachePadded<AtomicU64>,

  // --- Mutations ---
  pub(crate) puts: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Removal by the cache ---
  pub(crate) expired: CachePadded<AtomicU64>,
  pub(crate) evicted: CachePadded<AtomicU64>,

  // Iterators currently open.
  pub(crate) open_iterations: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      loads: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      refreshes: CachePadded::new(AtomicU64::new(0)),
      prefetches: CachePadded::new(AtomicU64::new(0)),
      prefetches_dropped: CachePadded::new(AtomicU64::new(0)),
      puts: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      expired: CachePadded::new(AtomicU64::new(0)),
      evicted: CachePadded::new(AtomicU64::new(0)),
      open_iterations: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot. `entries` is the current store size.
  pub(crate) fn snapshot(&self, entries: usize) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      loads: self.loads.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      refreshes: self.refreshes.load(Ordering::Relaxed),
      prefetches: self.prefetches.load(Ordering::Relaxed),
      prefetches_dropped: self.prefetches_dropped.load(Ordering::Relaxed),
      puts: self.puts.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
      evicted: self.evicted.load(Ordering::Relaxed),
      open_iterations: self.open_iterations.load(Ordering::Relaxed),
      entries,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups answered from a readable value, including callers that waited
  /// for another caller's load.
  pub hits: u64,
  /// Lookups that had to start a load.
  pub misses: u64,
  /// hits / (hits + misses).
  pub hit_ratio: f64,
  /// Successful loader calls.
  pub loads: u64,
  pub load_failures: u64,
  /// Successful background reloads of expiring values.
  pub refreshes: u64,
  /// Loads handed to the worker pool by `prefetch*`.
  pub prefetches: u64,
  /// Prefetch requests skipped because the worker pool was saturated.
  pub prefetches_dropped: u64,
  /// Values written by `put`, `replace`, `invoke` and friends.
  pub puts: u64,
  /// Entries removed explicitly.
  pub removals: u64,
  /// Entries that expired.
  pub expired: u64,
  /// Entries evicted to stay within capacity.
  pub evicted: u64,
  /// Iterators currently open.
  pub open_iterations: u64,
  /// Entries in the store, in any state.
  pub entries: usize,
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("loads", &self.loads)
      .field("load_failures", &self.load_failures)
      .field("refreshes", &self.refreshes)
      .field("prefetches", &self.prefetches)
      .field("prefetches_dropped", &self.prefetches_dropped)
      .field("puts", &self.puts)
      .field("removals", &self.removals)
      .field("expired", &self.expired)
      .field("evicted", &self.evicted)
      .field("open_iterations", &self.open_iterations)
      .field("entries", &self.entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
