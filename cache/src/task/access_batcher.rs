use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

const BATCH_STRIPES: usize = 16; // Power of two for bitmasking.

/// Hits buffered per stripe before the recording thread drains the batcher.
const STRIPE_LIMIT: usize = 64;

/// Striped buffer of read-path hits.
///
/// Readers only lock the stripe their key hashes to, so hits never contend on
/// the eviction policy's lock. The buffered keys reach the policy when the
/// batcher is drained: on the next admission, or by the reader that fills a
/// stripe.
pub(crate) struct AccessBatcher<K> {
  stripes: Box<[CachePadded<Mutex<Vec<K>>>]>,
}

impl<K: Clone> AccessBatcher<K> {
  pub(crate) fn new() -> Self {
    Self {
      stripes: (0..BATCH_STRIPES)
        .map(|_| CachePadded::new(Mutex::new(Vec::new())))
        .collect(),
    }
  }

  /// Buffers one hit. Returns `true` once the key's stripe is full and the
  /// caller should drain.
  #[inline]
  pub(crate) fn record(&self, hash: u64, key: &K) -> bool {
    let mut stripe = self.stripes[hash as usize & (BATCH_STRIPES - 1)].lock();
    stripe.push(key.clone());
    stripe.len() >= STRIPE_LIMIT
  }

  /// Takes every buffered hit. Hits within a stripe keep their order.
  pub(crate) fn drain(&self) -> Vec<K> {
    let mut batch = Vec::new();
    for stripe in self.stripes.iter() {
      let mut guard = stripe.lock();
      if !guard.is_empty() {
        batch.append(&mut guard);
      }
    }
    batch
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn drain_returns_hits_in_stripe_order() {
    let batcher = AccessBatcher::<u32>::new();
    assert!(!batcher.record(3, &1));
    assert!(!batcher.record(3, &2));
    assert!(!batcher.record(3, &1));

    assert_eq!(batcher.drain(), vec![1, 2, 1]);
    assert!(batcher.drain().is_empty());
  }

  #[test]
  fn full_stripe_asks_for_a_drain() {
    let batcher = AccessBatcher::<u32>::new();
    for i in 0..(STRIPE_LIMIT - 1) {
      assert!(!batcher.record(5, &(i as u32)));
    }
    assert!(batcher.record(5, &0));
    // Other stripes are unaffected.
    assert!(!batcher.record(6, &0));
    assert_eq!(batcher.drain().len(), STRIPE_LIMIT + 1);
  }

  #[test]
  fn concurrent_hits_are_all_kept() {
    let batcher = Arc::new(AccessBatcher::<u64>::new());
    let handles: Vec<_> = (0..4u64)
      .map(|t| {
        let batcher = batcher.clone();
        thread::spawn(move || {
          let mut drained = 0;
          for i in 0..1000u64 {
            if batcher.record(t * 1000 + i, &i) {
              drained += batcher.drain().len();
            }
          }
          drained
        })
      })
      .collect();

    let drained: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(drained + batcher.drain().len(), 4000);
  }
}
