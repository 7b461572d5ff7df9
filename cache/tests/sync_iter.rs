mod common;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use strand_cache::CacheBuilder;

use crate::common::{build_test_cache_with_cap, ShardControllingHasher};

// ================================================================================================
// === Category A: Basic Functionality Tests
// ================================================================================================

#[test]
fn iter_on_empty_cache() {
  let cache = build_test_cache_with_cap(4, 100);
  assert_eq!(
    cache.iter().unwrap().count(),
    0,
    "Iterator on empty cache should yield no items"
  );
}

#[test]
fn iter_visits_all_items_across_shards() {
  let cache = build_test_cache_with_cap(4, 100);
  let mut expected = HashMap::new();

  for i in 0..50 {
    let value = i.to_string();
    cache.put(i, value.clone()).unwrap();
    expected.insert(i, value);
  }

  let collected: HashMap<_, _> = cache
    .iter()
    .unwrap()
    .map(|view| {
      let (key, value) = view.into_parts();
      (key, (*value).clone())
    })
    .collect();
  assert_eq!(collected, expected);
}

#[test]
fn iter_yields_no_duplicates() {
  let cache = build_test_cache_with_cap(8, 1000);
  for i in 0..500 {
    cache.put(i, i.to_string()).unwrap();
  }

  let keys: Vec<i32> = cache.iter().unwrap().map(|view| *view.key()).collect();
  let unique: HashSet<i32> = keys.iter().copied().collect();
  assert_eq!(keys.len(), 500);
  assert_eq!(unique.len(), keys.len());
}

#[test]
fn iter_with_uneven_shards() {
  // Keys 0, 4, 8 all land in shard 0; shards 1 and 2 stay empty.
  let cache = build_test_cache_with_cap(4, 100);
  for i in [0, 4, 8, 3] {
    cache.put(i, i.to_string()).unwrap();
  }
  let keys: HashSet<i32> = cache.iter().unwrap().map(|view| *view.key()).collect();
  assert_eq!(keys, HashSet::from([0, 3, 4, 8]));
}

// ================================================================================================
// === Category B: Lifecycle Tests
// ================================================================================================

#[test]
fn iter_counts_as_open_until_dropped() {
  let cache = build_test_cache_with_cap(4, 100);
  for i in 0..10 {
    cache.put(i, i.to_string()).unwrap();
  }

  let mut iter = cache.iter().unwrap();
  assert!(iter.next().is_some());
  assert_eq!(cache.metrics().open_iterations, 1);

  // Dropping early releases the iteration.
  drop(iter);
  assert_eq!(cache.metrics().open_iterations, 0);

  // So does running to the end, even before the drop.
  let mut iter = cache.iter().unwrap();
  for _ in iter.by_ref() {}
  assert_eq!(cache.metrics().open_iterations, 0);
  assert!(iter.next().is_none());
  drop(iter);
  assert_eq!(cache.metrics().open_iterations, 0);
}

#[test]
fn iter_stops_when_cache_is_destroyed() {
  let cache = build_test_cache_with_cap(4, 100);
  for i in 0..20 {
    cache.put(i, i.to_string()).unwrap();
  }

  let mut iter = cache.iter().unwrap();
  assert!(iter.next().is_some());
  cache.destroy();
  assert!(iter.next().is_none());
  drop(iter);
  assert_eq!(cache.metrics().open_iterations, 0);
}

// ================================================================================================
// === Category C: Consistency Tests
// ================================================================================================

#[test]
fn iter_skips_expired_entries() {
  let cache = CacheBuilder::<i32, String>::new()
    .shards(4)
    .hasher(ShardControllingHasher)
    .expire_after_write(Duration::from_millis(100))
    .timer_lag(Duration::from_secs(30))
    .build()
    .unwrap();
  for i in 0..10 {
    cache.put(i, i.to_string()).unwrap();
  }
  assert_eq!(cache.iter().unwrap().count(), 10);

  thread::sleep(Duration::from_millis(200));
  assert_eq!(cache.iter().unwrap().count(), 0);
  // Reaching an expired entry expires it.
  assert_eq!(cache.total_entry_count(), 0);
  assert_eq!(cache.metrics().expired, 10);
}

#[test]
fn iter_misses_entries_removed_before_reached() {
  let cache = build_test_cache_with_cap(4, 100);
  for i in 0..8 {
    cache.put(i, i.to_string()).unwrap();
  }

  let mut iter = cache.iter().unwrap();
  // The first item comes from shard 0 (keys 0 and 4).
  let first = *iter.next().unwrap().key();
  assert_eq!(first % 4, 0);

  // Shards 1 and 3 were not reached yet.
  cache.remove(&1).unwrap();
  cache.remove(&7).unwrap();

  let rest: HashSet<i32> = iter.map(|view| *view.key()).collect();
  assert!(!rest.contains(&1));
  assert!(!rest.contains(&7));
  assert!(!rest.contains(&first));
  for key in [2, 3, 5, 6] {
    assert!(rest.contains(&key), "Key {key} present throughout");
  }
}

#[test]
fn iter_reads_values_when_reached() {
  let cache = build_test_cache_with_cap(4, 100);
  for i in 0..4 {
    cache.put(i, "old".to_string()).unwrap();
  }

  let mut iter = cache.iter().unwrap();
  assert_eq!(*iter.next().unwrap().key(), 0);
  cache.put(3, "new".to_string()).unwrap();

  let rest: HashMap<i32, String> = iter
    .map(|view| (*view.key(), (**view.value()).clone()))
    .collect();
  assert_eq!(rest[&3], "new");
  assert_eq!(rest[&1], "old");
}

#[test]
fn iter_runs_alongside_writers() {
  let cache = Arc::new(build_test_cache_with_cap(8, 10_000));
  for i in 0..1000 {
    cache.put(i, i.to_string()).unwrap();
  }

  let barrier = Arc::new(Barrier::new(3));
  let writer = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    thread::spawn(move || {
      barrier.wait();
      for i in 1000..2000 {
        cache.put(i, i.to_string()).unwrap();
        cache.remove(&(i - 1000)).unwrap();
      }
    })
  };
  let reader = {
    let cache = cache.clone();
    let barrier = barrier.clone();
    thread::spawn(move || {
      barrier.wait();
      let keys: Vec<i32> = cache.iter().unwrap().map(|view| *view.key()).collect();
      let unique: HashSet<i32> = keys.iter().copied().collect();
      assert_eq!(unique.len(), keys.len(), "No key yielded twice");
    })
  };

  barrier.wait();
  writer.join().unwrap();
  reader.join().unwrap();
  assert_eq!(cache.total_entry_count(), 1000);
  assert_eq!(cache.iter().unwrap().count(), 1000);
}
