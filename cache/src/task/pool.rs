use crate::error::BuildError;

use fibre::mpmc;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A reserved slot in the worker pool. Dropping it returns the slot.
pub(crate) struct Permit {
  available: Arc<AtomicUsize>,
}

impl Drop for Permit {
  fn drop(&mut self) {
    self.available.fetch_add(1, Ordering::AcqRel);
  }
}

/// A fixed set of threads running background loads (prefetch and refresh),
/// all consuming one multi-consumer channel.
///
/// Work is admitted through permits: there are as many as the pool has threads
/// plus queue slots, so a job submitted with a permit never finds the channel
/// full. When no permit is free the caller skips the background load.
pub(crate) struct WorkerPool {
  sender: Mutex<Option<mpmc::Sender<Job>>>,
  available: Arc<AtomicUsize>,
  closing: Arc<AtomicBool>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
  pub(crate) fn new(name: &str, threads: usize, queue: usize) -> Result<Self, BuildError> {
    let closing = Arc::new(AtomicBool::new(false));
    if threads == 0 {
      return Ok(Self {
        sender: Mutex::new(None),
        available: Arc::new(AtomicUsize::new(0)),
        closing,
        workers: Mutex::new(Vec::new()),
      });
    }

    let permits = threads + queue;
    let (tx, rx) = mpmc::bounded::<Job>(permits);

    let mut workers = Vec::with_capacity(threads);
    for index in 0..threads {
      let rx = rx.clone();
      let worker_closing = closing.clone();
      let spawned = thread::Builder::new()
        .name(format!("{name}-loader-{index}"))
        .spawn(move || worker_loop(rx, worker_closing));
      match spawned {
        Ok(handle) => workers.push(handle),
        Err(e) => {
          // Unblock the threads already started before bailing out.
          closing.store(true, Ordering::Release);
          drop(tx);
          for worker in workers {
            let _ = worker.join();
          }
          return Err(BuildError::ThreadSpawn(e.to_string()));
        }
      }
    }

    Ok(Self {
      sender: Mutex::new(Some(tx)),
      available: Arc::new(AtomicUsize::new(permits)),
      closing,
      workers: Mutex::new(workers),
    })
  }

  /// Reserves a slot for one background job, or `None` if the pool is saturated.
  pub(crate) fn try_acquire(&self) -> Option<Permit> {
    let mut current = self.available.load(Ordering::Acquire);
    loop {
      if current == 0 || self.closing.load(Ordering::Acquire) {
        return None;
      }
      match self
        .available
        .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          return Some(Permit {
            available: self.available.clone(),
          })
        }
        Err(actual) => current = actual,
      }
    }
  }

  /// Queues `job`. The permit is held until the job finishes or is dropped.
  ///
  /// Returns `false` if the pool is shut down; the job is dropped unrun.
  /// Callers must not hold locks the job's destructor may take.
  pub(crate) fn submit(&self, permit: Permit, job: impl FnOnce() + Send + 'static) -> bool {
    let job: Job = Box::new(move || {
      let _permit = permit;
      job();
    });
    let sender = self.sender.lock();
    match sender.as_ref() {
      Some(tx) => tx.try_send(job).is_ok(),
      None => false,
    }
  }

  /// Number of free permits.
  #[cfg(test)]
  pub(crate) fn available(&self) -> usize {
    self.available.load(Ordering::Acquire)
  }

  /// Closes the queue, abandons jobs that have not started, and joins the
  /// workers. Running jobs finish first.
  pub(crate) fn shutdown(&self) {
    self.closing.store(true, Ordering::Release);
    drop(self.sender.lock().take());

    let workers = std::mem::take(&mut *self.workers.lock());
    let current = thread::current().id();
    for worker in workers {
      if worker.thread().id() != current {
        let _ = worker.join();
      }
    }
  }
}

fn worker_loop(rx: mpmc::Receiver<Job>, closing: Arc<AtomicBool>) {
  while let Ok(job) = rx.recv() {
    if closing.load(Ordering::Acquire) {
      drop(job);
      continue;
    }
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
      tracing::warn!("background load panicked");
    }
  }
}
