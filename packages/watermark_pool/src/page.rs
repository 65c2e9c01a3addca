use std::alloc::{Layout, alloc, dealloc};
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::{self, NonNull};

/// A single storage cell: room for one `T` plus the free-list link used
/// while the cell is vacant.
///
/// The link is a sibling field rather than an overlay of the value bytes.
/// It is meaningful only while the slot is reachable from the pool's free
/// list; the value is initialized only while it is not. The two states never
/// coexist.
///
/// Slots are manipulated exclusively through raw pointers. No reference to a
/// `Slot` is ever created, because the value field is uninitialized for most
/// of a slot's life and the link field is concurrently rewritten under the
/// pool's spin lock.
#[repr(C)]
pub(crate) struct Slot<T> {
    value: MaybeUninit<T>,
    next_free: *mut Slot<T>,
}

impl<T> Slot<T> {
    /// Returns a pointer to the value storage of `slot`.
    ///
    /// Taking the field address never reads the (possibly uninitialized)
    /// value.
    #[inline]
    pub(crate) fn value_ptr(slot: NonNull<Slot<T>>) -> NonNull<T> {
        // SAFETY: `slot` points into a live page allocation and the computed
        // field address cannot be null.
        unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*slot.as_ptr()).value).cast::<T>()) }
    }

    /// Reads the free-list link of `slot`.
    ///
    /// # Safety
    ///
    /// The slot must be vacant and the caller must hold the free-list lock.
    #[inline]
    pub(crate) unsafe fn next_free(slot: NonNull<Slot<T>>) -> *mut Slot<T> {
        // SAFETY: `slot` points into a live page allocation; the link field
        // was written during prelinking or by a previous push.
        unsafe { ptr::addr_of!((*slot.as_ptr()).next_free).read() }
    }

    /// Writes the free-list link of `slot`.
    ///
    /// # Safety
    ///
    /// The slot must be vacant (or freshly allocated) and unobservable by any
    /// other thread, either because the caller holds the free-list lock or
    /// because the slot's page has not been published yet.
    #[inline]
    pub(crate) unsafe fn set_next_free(slot: NonNull<Slot<T>>, next: *mut Slot<T>) {
        // SAFETY: only the link field is written; the value stays untouched.
        unsafe { ptr::addr_of_mut!((*slot.as_ptr()).next_free).write(next) };
    }
}

/// An owned, contiguous batch of slots.
///
/// Pages are created at pool construction or by the replenisher and are never
/// moved, resized, or released until the pool core itself is dropped, which
/// is what keeps a slot's address stable across its entire lifetime and
/// across later page appends.
///
/// The constructor prelinks the slots into a chain: `slot[i]` links to
/// `slot[i + 1]` and the last slot links to the caller-supplied tail.
pub(crate) struct Page<T> {
    slots: NonNull<Slot<T>>,
    len: NonZero<usize>,
}

impl<T> Page<T> {
    /// Allocates a page of `len` prelinked slots whose chain ends in `tail`.
    ///
    /// Returns `None` if the system allocator cannot provide the backing
    /// memory; the caller decides whether that is fatal.
    pub(crate) fn try_new(len: NonZero<usize>, tail: *mut Slot<T>) -> Option<Self> {
        let layout = Self::slots_layout(len)?;

        // SAFETY: the layout has non-zero size because `len` is non-zero and
        // `Slot<T>` contains a pointer field.
        let base = unsafe { alloc(layout) };
        let slots = NonNull::new(base.cast::<Slot<T>>())?;

        for index in 0..len.get() {
            // SAFETY: `index` is within the array allocated above.
            let slot = unsafe { NonNull::new_unchecked(slots.as_ptr().add(index)) };

            let next = if index + 1 < len.get() {
                // SAFETY: `index + 1` is still within the array.
                unsafe { slots.as_ptr().add(index + 1) }
            } else {
                tail
            };

            // SAFETY: the page is freshly allocated and not yet published, so
            // the slot is unaliased.
            unsafe { Slot::set_next_free(slot, next) };
        }

        Some(Self { slots, len })
    }

    fn slots_layout(len: NonZero<usize>) -> Option<Layout> {
        Layout::array::<Slot<T>>(len.get()).ok()
    }

    /// First slot of this page's prelinked chain.
    #[inline]
    pub(crate) fn head(&self) -> NonNull<Slot<T>> {
        self.slots
    }

    /// Last slot of this page's prelinked chain.
    #[inline]
    pub(crate) fn tail_slot(&self) -> NonNull<Slot<T>> {
        // SAFETY: `len - 1` is within the array; `len` is non-zero.
        unsafe { NonNull::new_unchecked(self.slots.as_ptr().add(self.len.get() - 1)) }
    }

    /// Number of slots this page contributes.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Trivial accessor; mutations only distort counts.
    pub(crate) fn len(&self) -> usize {
        self.len.get()
    }
}

impl<T> Drop for Page<T> {
    fn drop(&mut self) {
        // Values are never dropped here: by the time a page is released every
        // slot is vacant, so the storage holds only links and garbage.
        let layout =
            Self::slots_layout(self.len).expect("layout was already computed at allocation");

        // SAFETY: allocated in `try_new` with this same layout and not yet
        // deallocated.
        unsafe { dealloc(self.slots.as_ptr().cast(), layout) };
    }
}

// SAFETY: the raw slot pointer targets memory owned by this page alone, so
// the page may move between threads whenever the values it can hold may.
unsafe impl<T: Send> Send for Page<T> {}
