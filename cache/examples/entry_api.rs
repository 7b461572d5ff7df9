use strand_cache::{Cache, CacheBuilder};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1000);

// Atomic get-or-create: the closure runs under the entry's lock.
fn get_or_create_user_session(cache: &Cache<String, u32>, user_id: &str) -> u32 {
  println!("\nAttempting to get or create session for '{}'...", user_id);

  let session = cache
    .invoke(user_id.to_string(), |entry| match entry.value() {
      Some(existing) => {
        println!("Session found! ID: {}", existing);
        **existing
      }
      None => {
        let new_session_id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        println!(
          "No session found. Creating new session with ID: {}",
          new_session_id
        );
        entry.set_value(new_session_id);
        new_session_id
      }
    })
    .expect("cache is alive");
  session
}

fn main() {
  let cache = CacheBuilder::<String, u32>::new()
    .capacity(100)
    .build()
    .expect("Failed to build cache");

  let user_a = "user_a".to_string();
  let user_b = "user_b".to_string();

  // First call for user_a: no session yet
  let session_a_1 = get_or_create_user_session(&cache, &user_a);

  // Second call for user_a: the session exists
  let session_a_2 = get_or_create_user_session(&cache, &user_a);
  assert_eq!(
    session_a_1, session_a_2,
    "Session ID for user_a should be stable"
  );

  let session_b = get_or_create_user_session(&cache, &user_b);

  // Conditional writes.
  assert!(!cache.put_if_absent(user_b.clone(), 0).unwrap());
  assert!(cache.replace_if_equals(user_b.clone(), &session_b, 42).unwrap());

  println!("\nFinal cache state:");
  for entry in cache.iter().unwrap() {
    println!("{} -> session {}", entry.key(), entry.value());
  }
}
