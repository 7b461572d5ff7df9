use crate::error::BuildError;
use crate::task::timer::{TimerHandle, TimerQueue};

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the janitor sleeps when no timer is scheduled.
const JANITOR_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Receives the timers the janitor found due.
pub(crate) trait TimerTarget<K>: Send + Sync {
  fn on_timer(self: Arc<Self>, key: K, handle: TimerHandle);
}

/// The background thread that fires expiry timers.
///
/// It only holds a weak reference to the cache, so a cache that is dropped
/// without `destroy` is still torn down.
pub(crate) struct Janitor {
  handle: JoinHandle<()>,
}

impl Janitor {
  pub(crate) fn spawn<K, T>(name: &str, timers: Arc<TimerQueue<K>>, target: Weak<T>) -> Result<Self, BuildError>
  where
    K: Send + 'static,
    T: TimerTarget<K> + 'static,
  {
    let handle = thread::Builder::new()
      .name(format!("{name}-janitor"))
      .spawn(move || {
        while let Some(due) = timers.next_due(JANITOR_IDLE_WAIT) {
          if due.is_empty() {
            continue;
          }
          let Some(target) = target.upgrade() else {
            break;
          };
          for (handle, key) in due {
            target.clone().on_timer(key, handle);
          }
        }
      })
      .map_err(|e| BuildError::ThreadSpawn(e.to_string()))?;

    Ok(Self { handle })
  }

  /// Waits for the thread to exit. The timer queue must already be stopped.
  /// Skips the join when called from the janitor thread itself.
  pub(crate) fn join(self) {
    if self.handle.thread().id() == thread::current().id() {
      return;
    }
    let _ = self.handle.join();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::time::Instant;

  struct Recorder {
    fired: Mutex<Vec<u32>>,
  }

  impl TimerTarget<u32> for Recorder {
    fn on_timer(self: Arc<Self>, key: u32, _handle: TimerHandle) {
      self.fired.lock().push(key);
    }
  }

  #[test]
  fn fires_due_timers_and_stops() {
    let timers = Arc::new(TimerQueue::new());
    let recorder = Arc::new(Recorder {
      fired: Mutex::new(Vec::new()),
    });
    let janitor = Janitor::spawn("test", timers.clone(), Arc::downgrade(&recorder)).unwrap();

    timers.schedule(1, Instant::now() + Duration::from_millis(10));
    timers.schedule(2, Instant::now() + Duration::from_millis(20));

    let started = Instant::now();
    while recorder.fired.lock().len() < 2 && started.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(*recorder.fired.lock(), vec![1, 2]);

    timers.stop();
    janitor.join();
  }
}
