use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A tiny test-and-set mutual exclusion primitive for very short critical
/// sections.
///
/// Contended waiters busy-spin instead of parking, so every section guarded
/// by this lock must be O(1) pointer manipulation. The lock is neither
/// reentrant nor fair and must never be held across user code, allocations,
/// or condition variable notifications.
pub(crate) struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

/// Exclusive access to the value guarded by a [`SpinLock`].
///
/// The lock is released when the guard is dropped.
pub(crate) struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it becomes available.
    #[inline]
    pub(crate) fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on plain loads until the holder releases.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }

        SpinGuard { lock: self }
    }
}

// SAFETY: the lock serializes all access to the inner value, so sharing the
// lock between threads is sound whenever the value itself may move between
// threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

// SAFETY: sending the lock sends the inner value with it.
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard proves the lock is held, so no other reference
        // to the value exists.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard proves the lock is held, so no other reference
        // to the value exists.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn guards_exclusive_access() {
        let lock = SpinLock::new(0_u64);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                });
            }
        });

        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn reacquire_after_release() {
        let lock = SpinLock::new(1_u32);

        {
            let mut guard = lock.lock();
            *guard = 2;
        }

        // The previous guard released the lock, so this must not spin forever.
        assert_eq!(*lock.lock(), 2);
    }

    #[test]
    fn guard_exposes_value_mutably() {
        let lock = SpinLock::new(vec![1, 2, 3]);

        lock.lock().push(4);

        assert_eq!(*lock.lock(), vec![1, 2, 3, 4]);
    }
}
