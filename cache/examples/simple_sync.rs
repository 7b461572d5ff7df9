use strand_cache::CacheBuilder;
use std::thread;
use std::time::Duration;

fn main() {
  // A cache of 100 entries whose values expire 2 seconds after they were
  // loaded, at the exact instant.
  let cache = CacheBuilder::<String, usize>::new()
    .capacity(100)
    .expire_after_write(Duration::from_secs(2))
    .sharp_expiry(true)
    .loader(|key: &String| {
      println!("Loading value for '{}'...", key);
      thread::sleep(Duration::from_millis(100));
      Ok::<_, std::io::Error>(key.len())
    })
    .build()
    .expect("Failed to build cache");

  let key = "hello".to_string();

  // The first get loads, the second is served from the cache.
  println!("Value for '{}': {}", key, cache.get(&key).unwrap());
  println!("Value for '{}': {}", key, cache.get(&key).unwrap());

  // peek never loads.
  println!(
    "Peek at 'absent': {:?}",
    cache.peek(&"absent".to_string()).unwrap()
  );

  println!("\nCache metrics: {:#?}", cache.metrics());

  println!("\nWaiting for the value to expire...");
  thread::sleep(Duration::from_millis(2100));
  println!("Present after expiry: {}", cache.contains_key(&key).unwrap());

  // Loads again.
  println!("Value for '{}': {}", key, cache.get(&key).unwrap());

  println!("\nCache metrics after expiration: {:#?}", cache.metrics());
}
