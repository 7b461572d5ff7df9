use super::EvictionPolicy;

use ahash::{HashSet, HashSetExt};
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::hash::Hash;

/// Evicts uniformly random keys. Ignores access patterns.
#[derive(Debug)]
pub struct RandomPolicy<K> {
  keys: Mutex<HashSet<K>>,
}

impl<K> RandomPolicy<K> {
  pub fn new() -> Self {
    Self {
      keys: Mutex::new(HashSet::new()),
    }
  }
}

impl<K> Default for RandomPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> EvictionPolicy<K> for RandomPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_admit(&self, key: &K) {
    self.keys.lock().insert(key.clone());
  }

  fn on_access(&self, _key: &K) {}

  fn on_remove(&self, key: &K) {
    self.keys.lock().remove(key);
  }

  fn evict(&self, count: usize) -> Vec<K> {
    let mut keys = self.keys.lock();
    let mut rng = rand::rng();
    let victims: Vec<K> = keys.iter().cloned().choose_multiple(&mut rng, count);
    for victim in &victims {
      keys.remove(victim);
    }
    victims
  }

  fn clear(&self) {
    self.keys.lock().clear();
  }
}
