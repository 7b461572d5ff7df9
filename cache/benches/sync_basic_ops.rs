use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strand_cache::{Cache, CacheBuilder};
use std::convert::Infallible;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const NUM_ITEMS: u64 = 10_000;
const CAPACITY: usize = 20_000;

#[derive(Debug, Clone, Copy)]
enum Op {
  GetHit,
  GetLoad,
  Put,
  Peek,
}

impl Op {
  fn name(self) -> &'static str {
    match self {
      Op::GetHit => "GetHit",
      Op::GetLoad => "GetLoad",
      Op::Put => "Put",
      Op::Peek => "Peek",
    }
  }
}

fn build_cache() -> Arc<Cache<u64, u64>> {
  let cache = CacheBuilder::<u64, u64>::new()
    .capacity(CAPACITY)
    .loader(|key: &u64| Ok::<_, Infallible>(*key))
    .build()
    .unwrap();
  for i in 0..NUM_ITEMS {
    cache.put(i, i).unwrap();
  }
  Arc::new(cache)
}

/// Splits a scrambled key sequence among the threads. Stepping by a number
/// coprime to the key count visits every key once.
fn keys_by_thread(op: Op, concurrency: usize) -> Vec<Vec<u64>> {
  let offset = match op {
    Op::GetHit | Op::Peek => 0,
    Op::GetLoad | Op::Put => NUM_ITEMS,
  };
  let mut keys = vec![Vec::new(); concurrency];
  for i in 0..NUM_ITEMS {
    let key = offset + (i * 7919) % NUM_ITEMS;
    keys[i as usize % concurrency].push(key);
  }
  keys
}

fn run_once(op: Op, concurrency: usize) -> Duration {
  let cache = build_cache();
  let keys = keys_by_thread(op, concurrency);
  let barrier = Arc::new(Barrier::new(concurrency));

  let start = Instant::now();
  thread::scope(|s| {
    for thread_keys in &keys {
      let barrier = barrier.clone();
      let cache = &cache;
      s.spawn(move || {
        barrier.wait();
        for key in thread_keys {
          match op {
            Op::GetHit | Op::GetLoad => {
              black_box(cache.get(key).unwrap());
            }
            Op::Put => cache.put(*key, *key).unwrap(),
            Op::Peek => {
              black_box(cache.peek(key).unwrap());
            }
          }
        }
      });
    }
  });
  start.elapsed()
}

fn sync_benches(c: &mut Criterion) {
  let mut group = c.benchmark_group("SyncCache");
  group.throughput(Throughput::Elements(NUM_ITEMS));
  group.sample_size(20);

  for op in [Op::GetHit, Op::GetLoad, Op::Put, Op::Peek] {
    for concurrency in [1usize, 4, 8] {
      group.bench_with_input(
        BenchmarkId::new(op.name(), concurrency),
        &concurrency,
        |b, &concurrency| {
          b.iter_custom(|iters| (0..iters).map(|_| run_once(op, concurrency)).sum());
        },
      );
    }
  }
  group.finish();
}

criterion_group!(benches, sync_benches);
criterion_main!(benches);
