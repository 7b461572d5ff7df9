use super::lru_list::LruList;
use super::EvictionPolicy;

use parking_lot::Mutex;
use std::hash::Hash;

/// Least-recently-used eviction.
///
/// Every admission and hit moves the key to the head of the list; victims are
/// taken from the tail.
#[derive(Debug)]
pub struct LruPolicy<K: Eq + Hash + Clone> {
  list: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone> LruPolicy<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(LruList::new()),
    }
  }
}

impl<K: Eq + Hash + Clone> Default for LruPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> EvictionPolicy<K> for LruPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_admit(&self, key: &K) {
    self.list.lock().push_front(key.clone());
  }

  fn on_access(&self, key: &K) {
    self.list.lock().move_to_front(key);
  }

  fn on_access_batch(&self, keys: &[K]) {
    let mut list = self.list.lock();
    for key in keys {
      list.move_to_front(key);
    }
  }

  fn on_remove(&self, key: &K) {
    self.list.lock().remove(key);
  }

  fn evict(&self, count: usize) -> Vec<K> {
    let mut list = self.list.lock();
    let mut victims = Vec::with_capacity(count.min(list.len()));
    while victims.len() < count {
      match list.pop_back() {
        Some(key) => victims.push(key),
        None => break,
      }
    }
    victims
  }

  fn clear(&self) {
    self.list.lock().clear();
  }
}
