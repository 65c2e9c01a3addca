use std::num::NonZero;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::constants::ERR_POISONED_LOCK;
use crate::page::Page;
use crate::pool::PoolCore;

/// The wake-up protocol between the allocation fast path and the
/// replenisher thread.
///
/// `requested` means "at least one caller crossed the low-water mark since
/// the worker last consumed a wake". The worker re-arms it before each
/// growth round, so crossings that land while a page is under construction
/// are served by the next round without another notification.
pub(crate) struct ReplenishSignal {
    requested: AtomicBool,
    running: Mutex<bool>,
    wake: Condvar,
}

impl ReplenishSignal {
    pub(crate) fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            running: Mutex::new(true),
            wake: Condvar::new(),
        }
    }

    /// Signals that the low-water mark was just crossed.
    ///
    /// Many threads may cross concurrently; only the first one that finds
    /// the mutex uncontended pays for a notification. A failed try-lock
    /// means the worker is awake between waits and will observe the flag
    /// when it next checks its predicate.
    pub(crate) fn request(&self) {
        self.requested.store(true, Ordering::Release);

        if let Ok(guard) = self.running.try_lock() {
            drop(guard);
            self.wake.notify_one();
        }
    }

    /// Blocks until a growth round is requested or shutdown begins.
    ///
    /// Consumes the request flag before returning, re-arming the trigger for
    /// future crossings. Returns `false` once the pool is shutting down.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut running = self.running.lock().expect(ERR_POISONED_LOCK);
        while !self.requested.load(Ordering::Acquire) && *running {
            running = self.wake.wait(running).expect(ERR_POISONED_LOCK);
        }

        self.requested.store(false, Ordering::Relaxed);
        *running
    }

    /// Clears the running flag and wakes the worker so it can exit.
    pub(crate) fn shutdown(&self) {
        match self.running.lock() {
            Ok(mut running) => *running = false,
            // A poisoned mutex means the worker died; flip the flag anyway
            // so nothing can wait on it afterwards.
            Err(poisoned) => *poisoned.into_inner() = false,
        }

        self.wake.notify_one();
    }
}

/// Spawns the dedicated replenisher thread for `core`.
///
/// The thread parks on the replenish signal and appends one page of
/// `grow_chunk` slots per consumed wake. It exits when the pool shuts the
/// signal down and is joined by the pool's `Drop`.
pub(crate) fn spawn<T: Send + 'static>(core: Arc<PoolCore<T>>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("watermark-pool-replenisher".to_string())
        .spawn(move || run(&core))
        .expect("failed to spawn the replenisher thread")
}

fn run<T>(core: &PoolCore<T>) {
    debug!(
        grow_chunk = core.grow_chunk(),
        min_capacity = core.min_capacity(),
        "replenisher started"
    );

    while core.signal().wait_for_work() {
        let Some(len) = NonZero::new(core.grow_chunk()) else {
            // A zero-capacity pool has nothing to grow by.
            continue;
        };

        // Building the page is the expensive part; it happens without
        // holding any pool lock. Only the O(1) splice contends with
        // allocators.
        match Page::try_new(len, ptr::null_mut()) {
            Some(page) => {
                core.splice_page(page);
                trace!(slots = len.get(), "appended page");
            }
            None => {
                // Not fatal: the pool is left unchanged and drained callers
                // keep degrading to the system allocator.
                warn!(slots = len.get(), "page allocation failed");
            }
        }
    }

    debug!("replenisher stopped");
}
