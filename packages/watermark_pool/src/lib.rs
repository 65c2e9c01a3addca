//! A low-latency, fixed-size object pool with watermark-driven background
//! replenishment.
//!
//! This crate provides [`WatermarkPool`], a pool that pre-reserves storage
//! slots for values of a single type and hands them out on a fast path that
//! amounts to a handful of pointer updates under a spin lock. Reclaiming a
//! value is just as cheap: dropping the last clone of its handle runs the
//! destructor and pushes the slot back onto an intrusive free list.
//!
//! What keeps the fast path fast under sustained pressure is the watermark
//! protocol: when an acquisition drops the number of available slots to the
//! configured low-water mark, a dedicated background thread appends a fresh
//! page of slots. The expensive system allocation happens off the hot path;
//! callers only ever pay for the O(1) splice that publishes the new page.
//!
//! # Key Features
//!
//! - **Bounded critical sections**: the allocator path holds a spin lock for
//!   pointer manipulation only — never across constructors, destructors, or
//!   allocations
//! - **Background growth**: a low-water crossing wakes a dedicated
//!   replenisher thread that appends pages; memory only grows
//! - **Graceful degradation**: a drained pool silently serves acquisitions
//!   from the system allocator, and the returned handle is indistinguishable
//!   from a pool-backed one
//! - **Shared handles**: [`Pooled<T>`] is cloneable, dereferences to `T`, and
//!   releases storage exactly once, from whichever thread drops it last
//! - **Stable addresses**: pages never move or shrink, so a value's address
//!   is stable for its entire lifetime
//! - **Safe teardown**: outstanding handles keep the pool's storage alive
//!   even after the pool itself is dropped
//!
//! # Example
//!
//! ```rust
//! use watermark_pool::WatermarkPool;
//!
//! // 128 pre-reserved slots; refill in the background whenever only 16 are
//! // left, 112 slots at a time.
//! let pool = WatermarkPool::builder()
//!     .max_capacity(128)
//!     .min_capacity(16)
//!     .build();
//!
//! let message = pool.acquire(String::from("hello"));
//! assert_eq!(*message, "hello");
//!
//! // Handles are shared; storage returns when the last clone drops.
//! let clone = message.clone();
//! drop(message);
//! assert_eq!(*clone, "hello");
//!
//! drop(clone);
//! assert_eq!(pool.available(), 128);
//! ```
//!
//! # Concurrent acquisition
//!
//! ```rust
//! use std::thread;
//!
//! use watermark_pool::WatermarkPool;
//!
//! let pool = WatermarkPool::new(64, 8);
//!
//! thread::scope(|s| {
//!     for worker in 0..4 {
//!         let pool = &pool;
//!         s.spawn(move || {
//!             for i in 0..100 {
//!                 let value = pool.acquire(worker * 100 + i);
//!                 assert_eq!(*value, worker * 100 + i);
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(pool.available(), pool.total_slots());
//! ```
//!
//! # What this pool is not
//!
//! The pool stores values of one type per pool instance, never relocates or
//! compacts them, and never returns pages to the operating system. It offers
//! no fairness under contention and no detection of handle misuse; it is a
//! building block for latency-sensitive systems, not a general-purpose
//! allocator.

mod builder;
mod constants;
mod page;
mod pool;
mod pooled;
mod replenisher;
mod spin;

pub use builder::{ConfigError, WatermarkPoolBuilder};
pub use pool::WatermarkPool;
pub use pooled::Pooled;
