use ahash::{HashMap, HashMapExt};
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Identifies one scheduled timer. Handles are never reused.
pub(crate) type TimerHandle = u64;

// Rebuild the heap once cancelled slots outnumber live timers by this factor.
const COMPACT_FACTOR: usize = 2;
const COMPACT_MIN: usize = 64;

struct TimerState<K> {
  heap: BinaryHeap<Reverse<(Instant, TimerHandle)>>,
  // Live timers. Cancelled handles stay in the heap and are skipped when popped.
  pending: HashMap<TimerHandle, K>,
  next_handle: TimerHandle,
  stopped: bool,
}

/// Per-entry expiry timers, ordered by deadline.
///
/// Entries schedule a timer when they get an expiry and cancel it when the
/// value is replaced or removed. The janitor thread blocks in
/// [`TimerQueue::next_due`] and fires due timers.
pub(crate) struct TimerQueue<K> {
  state: Mutex<TimerState<K>>,
  wakeup: Condvar,
}

impl<K> TimerQueue<K> {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(TimerState {
        heap: BinaryHeap::new(),
        pending: HashMap::new(),
        next_handle: 1,
        stopped: false,
      }),
      wakeup: Condvar::new(),
    }
  }

  pub(crate) fn schedule(&self, key: K, deadline: Instant) -> TimerHandle {
    let mut state = self.state.lock();
    let handle = state.next_handle;
    state.next_handle += 1;

    let earliest = state.heap.peek().map_or(true, |Reverse((first, _))| deadline < *first);
    state.heap.push(Reverse((deadline, handle)));
    state.pending.insert(handle, key);
    drop(state);

    if earliest {
      self.wakeup.notify_one();
    }
    handle
  }

  pub(crate) fn cancel(&self, handle: TimerHandle) {
    let mut state = self.state.lock();
    state.pending.remove(&handle);
    if state.heap.len() > COMPACT_MIN && state.heap.len() > state.pending.len() * COMPACT_FACTOR {
      let state = &mut *state;
      let pending = &state.pending;
      state.heap.retain(|Reverse((_, handle))| pending.contains_key(handle));
    }
  }

  /// Number of live timers.
  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.state.lock().pending.len()
  }

  /// Blocks until at least one timer is due or `idle` elapses, then returns the
  /// due timers (possibly none). Returns `None` once the queue is stopped.
  pub(crate) fn next_due(&self, idle: Duration) -> Option<Vec<(TimerHandle, K)>> {
    let mut state = self.state.lock();
    let idle_until = Instant::now() + idle;

    loop {
      if state.stopped {
        return None;
      }

      let now = Instant::now();
      let mut due = Vec::new();
      while let Some(Reverse((deadline, handle))) = state.heap.peek().copied() {
        if deadline > now {
          break;
        }
        state.heap.pop();
        if let Some(key) = state.pending.remove(&handle) {
          due.push((handle, key));
        }
      }
      if !due.is_empty() || now >= idle_until {
        return Some(due);
      }

      let wake_at = match state.heap.peek() {
        Some(Reverse((deadline, _))) => (*deadline).min(idle_until),
        None => idle_until,
      };
      self.wakeup.wait_until(&mut state, wake_at);
    }
  }

  /// Wakes the janitor and makes every later `next_due` return `None`.
  pub(crate) fn stop(&self) {
    let mut state = self.state.lock();
    state.stopped = true;
    state.heap.clear();
    state.pending.clear();
    drop(state);
    self.wakeup.notify_all();
  }
}
