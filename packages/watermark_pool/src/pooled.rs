use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::page::Slot;
use crate::pool::PoolCore;

/// A shared handle to a value acquired from a
/// [`WatermarkPool`](crate::WatermarkPool).
///
/// Handles may be cloned freely and moved between threads; the value's
/// destructor runs exactly once, when the last clone is dropped, and the
/// underlying storage is then returned to wherever it came from. The handle
/// type does not reveal whether the value occupies a pool slot or — because
/// the pool was drained at acquisition time — a plain heap allocation; both
/// behave identically at the call site.
///
/// A pool-backed handle keeps the pool's storage alive: pages are not freed
/// while any handle into them exists, even if the pool itself has already
/// been dropped.
///
/// # Example
///
/// ```rust
/// use watermark_pool::WatermarkPool;
///
/// let pool = WatermarkPool::new(4, 1);
///
/// let value = pool.acquire(vec![1, 2, 3]);
/// let clone = value.clone();
///
/// drop(value);
/// // The slot is still held by `clone`.
/// assert_eq!(*clone, vec![1, 2, 3]);
/// ```
pub struct Pooled<T> {
    inner: Arc<PooledInner<T>>,
}

/// Owns the value's storage and encodes where the storage must be returned
/// on last release.
struct PooledInner<T> {
    value: NonNull<T>,
    origin: Origin<T>,
}

/// The disposer variant, selected at acquisition time.
enum Origin<T> {
    /// The value occupies a pool slot. The core reference keeps the slot's
    /// page alive for at least as long as this handle.
    Pool {
        slot: NonNull<Slot<T>>,
        core: Arc<PoolCore<T>>,
    },

    /// The value was heap-allocated because the pool was drained. The value
    /// pointer owns the allocation.
    Heap,
}

impl<T> Pooled<T> {
    /// Wraps a slot whose storage has just been initialized with a value.
    pub(crate) fn from_pool(slot: NonNull<Slot<T>>, core: Arc<PoolCore<T>>) -> Self {
        Self {
            inner: Arc::new(PooledInner {
                value: Slot::value_ptr(slot),
                origin: Origin::Pool { slot, core },
            }),
        }
    }

    /// Wraps a heap allocation produced by the fallback path.
    pub(crate) fn from_heap(value: Box<T>) -> Self {
        // SAFETY: `Box::into_raw` never returns null.
        let value = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };

        Self {
            inner: Arc::new(PooledInner {
                value,
                origin: Origin::Heap,
            }),
        }
    }
}

impl<T> Clone for Pooled<T> {
    /// Creates another handle to the same value.
    ///
    /// The storage is returned only after every clone has been dropped.
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: the value is initialized for the whole life of the inner
        // state, and only shared references are ever handed out.
        unsafe { self.inner.value.as_ref() }
    }
}

impl<T> Drop for PooledInner<T> {
    /// The disposer: runs once, on last release of the handle.
    fn drop(&mut self) {
        match &self.origin {
            Origin::Pool { slot, core } => {
                // SAFETY: this is the final release of a slot acquired from
                // `core`, still holding its initialized value.
                unsafe { core.release(*slot) };
            }
            Origin::Heap => {
                // SAFETY: the pointer came from `Box::into_raw` in
                // `from_heap` and has not been freed.
                drop(unsafe { Box::from_raw(self.value.as_ptr()) });
            }
        }
    }
}

// SAFETY: a handle can move to another thread when the value can (it may be
// dropped there) and when shared access from clones on other threads is
// allowed, i.e. `T: Send + Sync` — the same bounds `Arc<T>` itself uses.
unsafe impl<T: Send + Sync> Send for PooledInner<T> {}

// SAFETY: see above; shared access only ever yields `&T`.
unsafe impl<T: Send + Sync> Sync for PooledInner<T> {}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::WatermarkPool;

    /// Counts destructor runs so tests can assert drop parity.
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn destructor_runs_once_on_last_release() {
        let drops = Arc::new(AtomicUsize::new(0));
        let pool = WatermarkPool::new(2, 0);

        let handle = pool.acquire(DropCounter(Arc::clone(&drops)));
        let clone_a = handle.clone();
        let clone_b = handle.clone();

        drop(handle);
        drop(clone_a);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(clone_b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn heap_backed_handles_behave_identically() {
        let drops = Arc::new(AtomicUsize::new(0));

        // A zero-capacity pool guarantees the heap-backed origin; a sized
        // pool provides the slot-backed one. The handles are the same type
        // with the same life cycle.
        let heap_pool = WatermarkPool::new(0, 0);
        let slot_pool = WatermarkPool::new(2, 0);

        let pooled = slot_pool.acquire(DropCounter(Arc::clone(&drops)));
        let fallback = heap_pool.acquire(DropCounter(Arc::clone(&drops)));

        let fallback_clone = fallback.clone();
        drop(fallback);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(fallback_clone);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(pooled);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert_eq!(slot_pool.available(), 2);
    }

    #[test]
    fn release_from_another_thread() {
        let pool = WatermarkPool::new(4, 1);

        let handle = pool.acquire(String::from("crossing"));

        thread::spawn(move || {
            assert_eq!(*handle, "crossing");
            drop(handle);
        })
        .join()
        .unwrap();

        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn handles_keep_pool_storage_alive() {
        let drops = Arc::new(AtomicUsize::new(0));

        let handle = {
            let pool = WatermarkPool::new(2, 0);
            pool.acquire(DropCounter(Arc::clone(&drops)))
        };
        // The pool is gone; the handle still owns a valid slot.

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deref_reads_the_stored_value() {
        let pool = WatermarkPool::new(2, 0);

        let text = pool.acquire(String::from("hello world"));
        assert_eq!(text.len(), 11);
        assert!(text.starts_with("hello"));
    }

    #[test]
    fn debug_formats_the_value() {
        let pool = WatermarkPool::new(2, 0);
        let value = pool.acquire(7_u32);

        assert_eq!(format!("{value:?}"), "Pooled(7)");
    }

    #[test]
    fn trait_matrix() {
        use std::cell::RefCell;
        use std::rc::Rc;

        use static_assertions::{assert_impl_all, assert_not_impl_any};

        assert_impl_all!(Pooled<u32>: Send, Sync);
        assert_impl_all!(Pooled<String>: Send, Sync);

        // Shared handles allow concurrent access from clones, so both
        // markers require `T: Send + Sync`.
        assert_not_impl_any!(Pooled<Rc<u32>>: Send, Sync);
        assert_not_impl_any!(Pooled<RefCell<u32>>: Send, Sync);
    }
}
