// cache/tests/policies.rs

use strand_cache::{policy::*, Cache, CacheBuilder};

fn hit(cache: &Cache<i32, &'static str>, key: i32) {
  // Without a loader, `get` only counts as an access when the key is present.
  cache.get(&key).unwrap();
}

// --- Clock Policy Tests ---
mod clock {
  use super::*;
  use strand_cache::policy::clock::ClockPolicy;

  #[test]
  fn test_clock_is_the_default() {
    let cache = CacheBuilder::default().capacity(3).build().unwrap();

    cache.put(1, "a").unwrap();
    cache.put(2, "b").unwrap();
    cache.put(3, "c").unwrap();
    hit(&cache, 1);

    cache.put(4, "d").unwrap();
    assert_eq!(cache.total_entry_count(), 3);
    assert!(cache.peek(&2).unwrap().is_none(), "Key 2 should have been evicted");
    assert!(cache.peek(&1).unwrap().is_some(), "Key 1 had a second chance");
    assert!(cache.peek(&3).unwrap().is_some());
    assert!(cache.peek(&4).unwrap().is_some());
    assert_eq!(cache.metrics().evicted, 1);
  }

  #[test]
  fn test_clock_explicit() {
    let cache = CacheBuilder::default()
      .capacity(2)
      .eviction_policy(ClockPolicy::new())
      .build()
      .unwrap();

    for key in 0..10 {
      cache.put(key, "v").unwrap();
      assert!(cache.total_entry_count() <= 2);
    }
    assert_eq!(cache.metrics().evicted, 8);
  }
}

// --- LRU Policy Tests ---
mod lru {
  use super::*;
  use strand_cache::policy::lru::LruPolicy;

  #[test]
  fn test_lru_eviction_logic() {
    let cache = CacheBuilder::default()
      .capacity(3)
      .eviction_policy(LruPolicy::new())
      .build()
      .unwrap();

    cache.put(1, "a").unwrap();
    cache.put(2, "b").unwrap();
    cache.put(3, "c").unwrap();
    assert_eq!(cache.total_entry_count(), 3);

    hit(&cache, 1);

    cache.put(4, "d").unwrap();
    assert_eq!(cache.total_entry_count(), 3);
    assert!(cache.peek(&2).unwrap().is_none(), "Key 2 should have been evicted");
    assert!(cache.peek(&1).unwrap().is_some());
    assert!(cache.peek(&3).unwrap().is_some());
    assert!(cache.peek(&4).unwrap().is_some());

    // An overwrite counts as a use.
    cache.put(3, "c2").unwrap();
    cache.put(5, "e").unwrap();
    assert!(cache.peek(&1).unwrap().is_none(), "Key 1 is now the oldest");
    assert_eq!(*cache.peek(&3).unwrap().unwrap(), "c2");
  }

  #[test]
  fn test_lru_forgets_removed_keys() {
    let cache = CacheBuilder::default()
      .capacity(2)
      .eviction_policy(LruPolicy::new())
      .build()
      .unwrap();

    cache.put(1, "a").unwrap();
    cache.put(2, "b").unwrap();
    cache.remove(&1).unwrap();
    cache.put(3, "c").unwrap();

    // Removing made room, nothing had to be evicted.
    assert_eq!(cache.metrics().evicted, 0);
    assert!(cache.peek(&2).unwrap().is_some());
    assert!(cache.peek(&3).unwrap().is_some());
  }
}

// --- Random Policy Tests ---
#[cfg(feature = "random")]
mod random {
  use super::*;
  use strand_cache::policy::random::RandomPolicy;

  #[test]
  fn test_random_respects_capacity() {
    let cache = CacheBuilder::default()
      .capacity(5)
      .eviction_policy(RandomPolicy::new())
      .build()
      .unwrap();

    for key in 0..20 {
      cache.put(key, "v").unwrap();
    }
    assert_eq!(cache.total_entry_count(), 5);
    assert_eq!(cache.metrics().evicted, 15);
    let present = (0..20)
      .filter(|key| cache.contains_key(key).unwrap())
      .count();
    assert_eq!(present, 5);
  }
}

// --- Custom Policy Tests ---
mod custom {
  use super::*;
  use parking_lot::Mutex;
  use std::collections::BTreeSet;
  use std::sync::Arc;

  /// Always evicts the largest key.
  #[derive(Default)]
  struct LargestFirst {
    keys: Mutex<BTreeSet<i32>>,
  }

  impl EvictionPolicy<i32> for LargestFirst {
    fn on_admit(&self, key: &i32) {
      self.keys.lock().insert(*key);
    }

    fn on_access(&self, _key: &i32) {}

    fn on_remove(&self, key: &i32) {
      self.keys.lock().remove(key);
    }

    fn evict(&self, count: usize) -> Vec<i32> {
      let mut keys = self.keys.lock();
      (0..count).filter_map(|_| keys.pop_last()).collect()
    }

    fn clear(&self) {
      self.keys.lock().clear();
    }
  }

  #[test]
  fn test_custom_policy_is_used() {
    let cache = CacheBuilder::default()
      .capacity(3)
      .eviction_policy(LargestFirst::default())
      .build()
      .unwrap();

    for key in [5, 1, 9, 3] {
      cache.put(key, "v").unwrap();
    }
    assert!(cache.peek(&9).unwrap().is_none());
    for key in [1, 3, 5] {
      assert!(cache.contains_key(&key).unwrap());
    }
  }

  #[derive(Debug, Clone, PartialEq)]
  enum Event {
    Admit(i32),
    Access(i32),
    Batch(usize),
  }

  /// Records what the cache tells it; never evicts.
  #[derive(Default)]
  struct Recording {
    events: Arc<Mutex<Vec<Event>>>,
  }

  impl EvictionPolicy<i32> for Recording {
    fn on_admit(&self, key: &i32) {
      self.events.lock().push(Event::Admit(*key));
    }

    fn on_access(&self, key: &i32) {
      self.events.lock().push(Event::Access(*key));
    }

    fn on_access_batch(&self, keys: &[i32]) {
      let mut events = self.events.lock();
      events.push(Event::Batch(keys.len()));
      events.extend(keys.iter().map(|key| Event::Access(*key)));
    }

    fn on_remove(&self, _key: &i32) {}

    fn evict(&self, _count: usize) -> Vec<i32> {
      Vec::new()
    }

    fn clear(&self) {}
  }

  #[test]
  fn test_hits_reach_policy_in_one_batch_before_next_admission() {
    let recording = Recording::default();
    let events = recording.events.clone();
    let cache = CacheBuilder::default()
      .capacity(100)
      .eviction_policy(recording)
      .build()
      .unwrap();

    cache.put(1, "a").unwrap();
    for _ in 0..10 {
      hit(&cache, 1);
    }
    assert_eq!(
      *events.lock(),
      vec![Event::Admit(1)],
      "Reads do not touch the policy"
    );

    cache.put(2, "b").unwrap();
    let mut expected = vec![Event::Admit(1), Event::Batch(10)];
    expected.extend(std::iter::repeat(Event::Access(1)).take(10));
    expected.push(Event::Admit(2));
    assert_eq!(*events.lock(), expected);
  }
}
