use super::EvictionPolicy;

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::hash::Hash;

// Compact the face once stale slots outnumber tracked keys by this much.
const COMPACT_SLACK: usize = 64;

#[derive(Debug, Clone, Copy)]
struct Slot {
  referenced: bool,
  // Admission stamp. A face slot whose stamp differs is stale.
  stamp: u64,
}

#[derive(Debug)]
struct ClockState<K> {
  tracked: HashMap<K, Slot>,
  // The circular "clock face". The hand is always at the front.
  face: VecDeque<(K, u64)>,
  next_stamp: u64,
}

impl<K: Eq + Hash> ClockState<K> {
  fn is_live(&self, key: &K, stamp: u64) -> bool {
    self.tracked.get(key).is_some_and(|slot| slot.stamp == stamp)
  }

  fn compact(&mut self) {
    let mut face = std::mem::take(&mut self.face);
    face.retain(|(key, stamp)| self.is_live(key, *stamp));
    self.face = face;
  }
}

/// Clock (second-chance) eviction, an inexpensive approximation of LRU.
///
/// A hit sets the key's referenced bit. The hand sweeps the clock face,
/// clearing set bits and evicting the first key whose bit is already clear.
/// Removed keys leave a stale slot behind that the hand skips.
#[derive(Debug)]
pub struct ClockPolicy<K> {
  state: Mutex<ClockState<K>>,
}

impl<K> ClockPolicy<K> {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(ClockState {
        tracked: HashMap::new(),
        face: VecDeque::new(),
        next_stamp: 0,
      }),
    }
  }
}

impl<K> Default for ClockPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> EvictionPolicy<K> for ClockPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_admit(&self, key: &K) {
    let mut state = self.state.lock();
    if state.tracked.contains_key(key) {
      return;
    }
    let stamp = state.next_stamp;
    state.next_stamp += 1;
    state.tracked.insert(
      key.clone(),
      Slot {
        referenced: false,
        stamp,
      },
    );
    state.face.push_back((key.clone(), stamp));
  }

  fn on_access(&self, key: &K) {
    let mut state = self.state.lock();
    if let Some(slot) = state.tracked.get_mut(key) {
      slot.referenced = true;
    }
  }

  fn on_access_batch(&self, keys: &[K]) {
    let mut state = self.state.lock();
    for key in keys {
      if let Some(slot) = state.tracked.get_mut(key) {
        slot.referenced = true;
      }
    }
  }

  fn on_remove(&self, key: &K) {
    let mut state = self.state.lock();
    if state.tracked.remove(key).is_some()
      && state.face.len() > state.tracked.len() * 2 + COMPACT_SLACK
    {
      state.compact();
    }
  }

  fn evict(&self, count: usize) -> Vec<K> {
    let mut state = self.state.lock();
    let state = &mut *state;
    let mut victims = Vec::with_capacity(count.min(state.tracked.len()));

    while victims.len() < count && !state.tracked.is_empty() {
      let Some((key, stamp)) = state.face.pop_front() else {
        break;
      };
      match state.tracked.get_mut(&key) {
        Some(slot) if slot.stamp == stamp => {
          if slot.referenced {
            slot.referenced = false;
            state.face.push_back((key, stamp));
          } else {
            state.tracked.remove(&key);
            victims.push(key);
          }
        }
        // Stale slot of a removed key.
        _ => {}
      }
    }
    victims
  }

  fn clear(&self) {
    let mut state = self.state.lock();
    state.tracked.clear();
    state.face.clear();
  }
}
