use std::mem;
use std::num::NonZero;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::builder::WatermarkPoolBuilder;
use crate::constants::ERR_POISONED_LOCK;
use crate::page::{Page, Slot};
use crate::pooled::Pooled;
use crate::replenisher::{self, ReplenishSignal};
use crate::spin::SpinLock;

/// The intrusive free list, threaded through vacant slot storage.
///
/// Invariant: `available` equals the length of the chain starting at `head`
/// at all times. Empty list ⇔ `head` is null.
pub(crate) struct FreeList<T> {
    head: *mut Slot<T>,
    available: usize,
}

// SAFETY: the pointers target slots owned by the enclosing pool core, and the
// spin lock serializes every access to them.
unsafe impl<T: Send> Send for FreeList<T> {}

/// Shared state behind a [`WatermarkPool`]: the pages, the free list, the
/// watermarks, and the replenish signal.
///
/// Kept alive by the pool itself, by the replenisher thread, and by every
/// outstanding pool-backed handle, so slot storage outlives all of them.
pub(crate) struct PoolCore<T> {
    free: SpinLock<FreeList<T>>,

    /// The page set. It only grows: mutated by the replenisher, dropped with
    /// the core. Insertion order carries no meaning.
    pages: Mutex<Vec<Page<T>>>,

    /// Low-water mark: crossing it on the way down wakes the replenisher.
    min_capacity: usize,

    /// Slots contributed per replenishment (`max_capacity - min_capacity`).
    grow_chunk: usize,

    signal: ReplenishSignal,
}

impl<T> PoolCore<T> {
    /// Creates the core with one initial page of `max_capacity` slots.
    ///
    /// Capacity validation happens in the builder; this only asserts it.
    pub(crate) fn new(max_capacity: usize, min_capacity: usize) -> Self {
        debug_assert!(
            max_capacity > min_capacity || (max_capacity == 0 && min_capacity == 0),
            "builder must reject max_capacity {max_capacity} <= min_capacity {min_capacity}"
        );

        let mut pages = Vec::new();
        let mut head = ptr::null_mut();

        if let Some(len) = NonZero::new(max_capacity) {
            let page = Page::try_new(len, ptr::null_mut())
                .expect("failed to allocate the pool's initial page");
            head = page.head().as_ptr();
            pages.push(page);
        }

        Self {
            free: SpinLock::new(FreeList {
                head,
                available: max_capacity,
            }),
            pages: Mutex::new(pages),
            min_capacity,
            grow_chunk: max_capacity - min_capacity,
            signal: ReplenishSignal::new(),
        }
    }

    /// The allocation fast path: pops the head of the free list.
    ///
    /// Returns `None` when the pool is drained, in which case the caller
    /// falls back to the system allocator. If the pop crossed the low-water
    /// mark, the replenisher is signalled after the critical section ends.
    pub(crate) fn acquire_slot(&self) -> Option<NonNull<Slot<T>>> {
        let mut notify_replenisher = false;

        let slot = {
            let mut free = self.free.lock();

            if free.available == 0 {
                None
            } else {
                free.available -= 1;
                if free.available == self.min_capacity {
                    notify_replenisher = true;
                }

                let slot = free.head;
                // SAFETY: `available` was non-zero, so the chain is non-empty
                // and `head` points at a vacant slot.
                free.head = unsafe { Slot::next_free(NonNull::new_unchecked(slot)) };
                NonNull::new(slot)
            }
        };

        // The notification may block on the replenish mutex; it must not
        // happen inside the spin-locked section.
        if notify_replenisher {
            self.signal.request();
        }

        slot
    }

    /// Destroys the value in `slot` and returns the slot to the free list.
    ///
    /// No replenish logic fires on release.
    ///
    /// # Safety
    ///
    /// `slot` must hold an initialized value acquired from this pool, and no
    /// handle to it may be used afterwards.
    pub(crate) unsafe fn release(&self, slot: NonNull<Slot<T>>) {
        // The destructor is arbitrary user code; run it before taking the
        // spin lock.
        // SAFETY: the caller guarantees the slot holds an initialized value
        // with no remaining users.
        unsafe { ptr::drop_in_place(Slot::value_ptr(slot).as_ptr()) };

        self.push_vacant(slot);
    }

    /// Prepends a vacant slot to the free list.
    ///
    /// Used both for regular release (after the value was destroyed) and for
    /// reclaiming a slot whose initializer panicked before writing a value.
    pub(crate) fn push_vacant(&self, slot: NonNull<Slot<T>>) {
        let mut free = self.free.lock();

        // SAFETY: the slot is vacant and owned by this pool; the lock is
        // held, so nothing else touches the chain.
        unsafe { Slot::set_next_free(slot, free.head) };
        free.head = slot.as_ptr();
        free.available += 1;
    }

    /// Links a freshly built page into the free list.
    ///
    /// Called by the replenisher only. The splice itself has the same shape
    /// and cost as a single acquire: O(1) pointer updates under the spin
    /// lock. The page allocation already happened outside.
    pub(crate) fn splice_page(&self, page: Page<T>) {
        let head = page.head();
        let tail = page.tail_slot();
        let added = page.len();

        {
            let mut free = self.free.lock();

            // SAFETY: the page is not yet published, so its tail slot is
            // unaliased; after these writes the whole page chain is reachable
            // from `head`.
            unsafe { Slot::set_next_free(tail, free.head) };
            free.head = head.as_ptr();
            free.available += added;
        }

        self.pages.lock().expect(ERR_POISONED_LOCK).push(page);
    }

    /// Number of currently vacant slots across all pages.
    pub(crate) fn available(&self) -> usize {
        self.free.lock().available
    }

    /// Total slot count across all pages. Monotonically non-decreasing.
    pub(crate) fn total_slots(&self) -> usize {
        self.pages
            .lock()
            .expect(ERR_POISONED_LOCK)
            .iter()
            .map(Page::len)
            .sum()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub(crate) fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub(crate) fn grow_chunk(&self) -> usize {
        self.grow_chunk
    }

    pub(crate) fn signal(&self) -> &ReplenishSignal {
        &self.signal
    }
}

/// Returns a popped slot to the free list if the value initializer panics
/// before the slot is populated.
///
/// Forgotten on the success path once the value has been written.
struct SlotReclaim<'a, T> {
    core: &'a PoolCore<T>,
    slot: NonNull<Slot<T>>,
}

impl<T> Drop for SlotReclaim<'_, T> {
    fn drop(&mut self) {
        // The slot never held a value, so there is nothing to destroy.
        self.core.push_vacant(self.slot);
    }
}

/// A low-latency, fixed-size object pool with background replenishment.
///
/// The pool pre-reserves storage for `max_capacity` values of `T` at
/// construction. [`acquire()`](Self::acquire) hands out slots from an
/// intrusive free list under a spin lock — a handful of pointer updates —
/// and dropping the last clone of the returned [`Pooled<T>`] runs the value's
/// destructor and returns the slot the same way.
///
/// When an acquisition drops the available count to `min_capacity`, a
/// dedicated background thread appends a page of
/// `max_capacity - min_capacity` fresh slots, so a bursty caller keeps
/// draining pre-reserved storage instead of stalling on a large system
/// allocation. If the pool is momentarily drained anyway, acquisition
/// silently falls back to the system allocator; the returned handle is
/// indistinguishable from a pool-backed one.
///
/// Memory only grows: pages are never reclaimed before the pool (and every
/// outstanding handle) is gone.
///
/// # Thread safety
///
/// [`acquire()`](Self::acquire) takes `&self` and may be called from any
/// number of threads concurrently; share the pool by reference or wrap it in
/// an [`Arc`]. Handles may be released on a different thread than the one
/// that acquired them.
///
/// # Example
///
/// ```rust
/// use watermark_pool::WatermarkPool;
///
/// let pool = WatermarkPool::builder()
///     .max_capacity(128)
///     .min_capacity(16)
///     .build();
///
/// let greeting = pool.acquire(String::from("hello"));
/// assert_eq!(*greeting, "hello");
///
/// // Handles are shared; the slot returns when the last clone drops.
/// let second = greeting.clone();
/// drop(greeting);
/// assert_eq!(*second, "hello");
/// ```
pub struct WatermarkPool<T> {
    core: Arc<PoolCore<T>>,
    replenisher: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> WatermarkPool<T> {
    /// Creates a builder for configuring and constructing a pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use watermark_pool::WatermarkPool;
    ///
    /// let pool = WatermarkPool::<u64>::builder()
    ///     .max_capacity(64)
    ///     .min_capacity(8)
    ///     .build();
    ///
    /// assert_eq!(pool.available(), 64);
    /// ```
    #[inline]
    pub fn builder() -> WatermarkPoolBuilder<T> {
        WatermarkPoolBuilder::new()
    }

    /// Creates a pool with the given capacities.
    ///
    /// `max_capacity` sizes the initial page; `min_capacity` is the low-water
    /// mark at which background replenishment is triggered. Each
    /// replenishment appends `max_capacity - min_capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics unless `max_capacity > min_capacity` or both are zero. Use
    /// [`builder()`](Self::builder) with
    /// [`try_build()`](WatermarkPoolBuilder::try_build) for a non-panicking
    /// variant.
    #[must_use]
    pub fn new(max_capacity: usize, min_capacity: usize) -> Self {
        Self::builder()
            .max_capacity(max_capacity)
            .min_capacity(min_capacity)
            .build()
    }

    /// Internal constructor used by the builder after validation.
    pub(crate) fn from_capacities(max_capacity: usize, min_capacity: usize) -> Self {
        let core = Arc::new(PoolCore::new(max_capacity, min_capacity));
        let replenisher = replenisher::spawn(Arc::clone(&core));

        Self {
            core,
            replenisher: Some(replenisher),
        }
    }

    /// Moves `value` into a pool slot and returns a shared handle to it.
    ///
    /// Never fails observably: if the pool is drained, the value is placed on
    /// the system heap instead and the returned handle is indistinguishable
    /// from a pool-backed one.
    ///
    /// # Example
    ///
    /// ```rust
    /// use watermark_pool::WatermarkPool;
    ///
    /// let pool = WatermarkPool::new(4, 1);
    ///
    /// let value = pool.acquire(7_u64);
    /// assert_eq!(*value, 7);
    /// assert_eq!(pool.available(), 3);
    ///
    /// drop(value);
    /// assert_eq!(pool.available(), 4);
    /// ```
    #[must_use]
    pub fn acquire(&self, value: T) -> Pooled<T> {
        self.acquire_with(move || value)
    }

    /// Acquires a slot first and then runs `init` to produce the value,
    /// writing it directly into the slot's storage.
    ///
    /// The initializer runs outside the pool's spin lock and may be
    /// arbitrarily expensive. If it panics, the slot is returned to the free
    /// list before the panic propagates; no partially initialized value is
    /// ever observable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use watermark_pool::WatermarkPool;
    ///
    /// let pool = WatermarkPool::new(8, 2);
    ///
    /// let buffer = pool.acquire_with(|| vec![0_u8; 4096]);
    /// assert_eq!(buffer.len(), 4096);
    /// ```
    #[must_use]
    pub fn acquire_with(&self, init: impl FnOnce() -> T) -> Pooled<T> {
        let Some(slot) = self.core.acquire_slot() else {
            // Drained (or zero-capacity) pool: graceful degradation to the
            // system allocator preserves forward progress.
            return Pooled::from_heap(Box::new(init()));
        };

        let reclaim = SlotReclaim {
            core: &self.core,
            slot,
        };
        let value = init();
        mem::forget(reclaim);

        // SAFETY: the slot was unlinked from the free list, so nothing else
        // can observe it; this write initializes the storage.
        unsafe { Slot::value_ptr(slot).as_ptr().write(value) };

        Pooled::from_pool(slot, Arc::clone(&self.core))
    }
}

impl<T> WatermarkPool<T> {
    /// Number of currently vacant slots across all pages.
    ///
    /// Under concurrent use this is a snapshot that may be stale by the time
    /// it is read.
    #[must_use]
    pub fn available(&self) -> usize {
        self.core.available()
    }

    /// Total slot count across all pages, including slots currently in use.
    ///
    /// Never decreases during the pool's lifetime.
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.core.total_slots()
    }

    /// The low-water mark supplied at construction.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn min_capacity(&self) -> usize {
        self.core.min_capacity()
    }

    /// Slots contributed by each background replenishment.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor.
    pub fn grow_chunk(&self) -> usize {
        self.core.grow_chunk()
    }
}

impl<T> Drop for WatermarkPool<T> {
    /// Shuts the replenisher down and waits for it to exit.
    ///
    /// Outstanding handles keep the shared core — and therefore every page —
    /// alive via reference counting, so dropping the pool before the last
    /// handle is safe; the storage is freed when that handle goes.
    fn drop(&mut self) {
        self.core.signal().shutdown();

        if let Some(worker) = self.replenisher.take() {
            worker
                .join()
                .expect("replenisher thread panicked during shutdown");
        }
    }
}

impl<T> std::fmt::Debug for WatermarkPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkPool")
            .field("available", &self.available())
            .field("total_slots", &self.total_slots())
            .field("min_capacity", &self.core.min_capacity())
            .field("grow_chunk", &self.core.grow_chunk())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn starts_with_one_full_page() {
        let pool = WatermarkPool::<u32>::new(8, 2);

        assert_eq!(pool.available(), 8);
        assert_eq!(pool.total_slots(), 8);
        assert_eq!(pool.grow_chunk(), 6);
    }

    #[test]
    fn acquire_decrements_and_release_restores() {
        let pool = WatermarkPool::new(4, 1);

        let a = pool.acquire(1_u32);
        let b = pool.acquire(2_u32);
        assert_eq!(pool.available(), 2);

        drop(a);
        assert_eq!(pool.available(), 3);
        drop(b);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn heap_fallback_does_not_touch_the_free_list() {
        // Only a zero-capacity pool is deterministically drained: draining a
        // sized pool crosses the low-water mark and races with growth.
        let pool = WatermarkPool::new(0, 0);

        let a = pool.acquire(10_u32);
        let b = pool.acquire(20_u32);

        assert_eq!((*a, *b), (10, 20));
        assert_eq!(pool.available(), 0);

        drop(a);
        drop(b);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.total_slots(), 0);
    }

    #[test]
    fn overcommitted_acquires_all_succeed() {
        let pool = WatermarkPool::new(2, 1);

        // More acquisitions than the initial page holds; the surplus is
        // served by growth or by the heap, invisibly either way.
        let handles: Vec<_> = (0..6_u32).map(|i| pool.acquire(i)).collect();

        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(**handle, u32::try_from(i).unwrap());
        }
        assert!(pool.available() <= pool.total_slots());
    }

    #[test]
    fn zero_capacity_pool_always_uses_heap() {
        let pool = WatermarkPool::new(0, 0);

        let values: Vec<_> = (0..16_usize).map(|i| pool.acquire(i)).collect();

        assert_eq!(pool.available(), 0);
        assert_eq!(pool.total_slots(), 0);

        for (i, value) in values.iter().enumerate() {
            assert_eq!(**value, i);
        }

        drop(values);
        assert_eq!(pool.total_slots(), 0);
    }

    #[test]
    fn slot_reuse_presents_fresh_values() {
        let pool = WatermarkPool::new(1, 0);

        let first = pool.acquire(String::from("first"));
        drop(first);

        // Whichever slot serves the next acquisition, it must present the
        // freshly supplied value, not a stale one.
        let second = pool.acquire(String::from("second"));
        assert_eq!(*second, "second");
    }

    #[test]
    fn panicking_initializer_returns_the_slot() {
        let pool = WatermarkPool::<String>::new(2, 0);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _value = pool.acquire_with(|| panic!("constructor failure"));
        }));

        assert!(outcome.is_err());
        // The popped slot went back; no slot leaked and no value exists.
        assert_eq!(pool.available(), 2);

        // The pool remains fully usable.
        let value = pool.acquire(String::from("after"));
        assert_eq!(*value, "after");
    }

    #[test]
    fn acquire_with_writes_into_pool_storage() {
        let pool = WatermarkPool::new(2, 0);

        let value = pool.acquire_with(|| vec![1_u8, 2, 3]);
        assert_eq!(*value, vec![1, 2, 3]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn debug_output_reports_counts() {
        let pool = WatermarkPool::<u8>::new(4, 1);
        let rendered = format!("{pool:?}");

        assert!(rendered.contains("available: 4"));
        assert!(rendered.contains("min_capacity: 1"));
    }
}
