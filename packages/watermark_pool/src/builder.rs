use std::marker::PhantomData;

use thiserror::Error;

use crate::WatermarkPool;

/// Error returned by [`WatermarkPoolBuilder::try_build()`] for invalid
/// capacity configurations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No maximum capacity was supplied before building.
    #[error("max_capacity must be set before building the pool")]
    MissingMaxCapacity,

    /// The low-water mark leaves no room for the pool to operate: the pool
    /// needs `max_capacity > min_capacity` (or both zero for a pool that
    /// always uses the system allocator).
    #[error(
        "min_capacity ({min_capacity}) must be less than max_capacity ({max_capacity}), \
         unless both are zero"
    )]
    WatermarkOrder {
        /// The rejected maximum capacity.
        max_capacity: usize,
        /// The rejected low-water mark.
        min_capacity: usize,
    },
}

/// Builder for a [`WatermarkPool`].
///
/// `max_capacity` is mandatory and sizes the pool's initial page;
/// `min_capacity` defaults to zero and is the low-water mark at which
/// background replenishment triggers. Each replenishment contributes
/// `max_capacity - min_capacity` slots.
///
/// # Examples
///
/// ```rust
/// use watermark_pool::WatermarkPool;
///
/// let pool = WatermarkPool::<String>::builder()
///     .max_capacity(1024)
///     .min_capacity(128)
///     .build();
///
/// assert_eq!(pool.available(), 1024);
/// assert_eq!(pool.grow_chunk(), 896);
/// ```
///
/// Invalid configurations are reported instead of panicking when using
/// [`try_build()`](Self::try_build):
///
/// ```rust
/// use watermark_pool::{ConfigError, WatermarkPool};
///
/// let result = WatermarkPool::<String>::builder()
///     .max_capacity(8)
///     .min_capacity(8)
///     .try_build();
///
/// assert_eq!(
///     result.err(),
///     Some(ConfigError::WatermarkOrder {
///         max_capacity: 8,
///         min_capacity: 8,
///     })
/// );
/// ```
#[derive(Debug)]
#[must_use]
pub struct WatermarkPoolBuilder<T> {
    max_capacity: Option<usize>,
    min_capacity: usize,
    _items: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> WatermarkPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            max_capacity: None,
            min_capacity: 0,
            _items: PhantomData,
        }
    }

    /// Sets the number of slots in the pool's initial page.
    ///
    /// A value of zero is accepted (together with a zero `min_capacity`) and
    /// produces a pool that allocates no storage and serves every
    /// acquisition from the system allocator.
    pub fn max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    /// Sets the low-water mark. Defaults to zero.
    ///
    /// When an acquisition drops the available count to exactly this value,
    /// the background replenisher is woken to append a page.
    pub fn min_capacity(mut self, min_capacity: usize) -> Self {
        self.min_capacity = min_capacity;
        self
    }

    /// Builds the pool, reporting invalid configurations as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingMaxCapacity`] if
    /// [`max_capacity()`](Self::max_capacity) was never called, and
    /// [`ConfigError::WatermarkOrder`] unless
    /// `max_capacity > min_capacity` or both capacities are zero.
    pub fn try_build(self) -> Result<WatermarkPool<T>, ConfigError> {
        let max_capacity = self.max_capacity.ok_or(ConfigError::MissingMaxCapacity)?;

        let zero_pool = max_capacity == 0 && self.min_capacity == 0;
        if max_capacity <= self.min_capacity && !zero_pool {
            return Err(ConfigError::WatermarkOrder {
                max_capacity,
                min_capacity: self.min_capacity,
            });
        }

        Ok(WatermarkPool::from_capacities(
            max_capacity,
            self.min_capacity,
        ))
    }

    /// Builds the pool.
    ///
    /// # Panics
    ///
    /// Panics on the configurations [`try_build()`](Self::try_build) rejects.
    #[must_use]
    pub fn build(self) -> WatermarkPool<T> {
        self.try_build().unwrap_or_else(|error| panic!("{error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_valid_watermarks() {
        let pool = WatermarkPool::<u32>::builder()
            .max_capacity(10)
            .min_capacity(3)
            .build();

        assert_eq!(pool.available(), 10);
        assert_eq!(pool.min_capacity(), 3);
        assert_eq!(pool.grow_chunk(), 7);
    }

    #[test]
    fn min_capacity_defaults_to_zero() {
        let pool = WatermarkPool::<u32>::builder().max_capacity(5).build();

        assert_eq!(pool.min_capacity(), 0);
        assert_eq!(pool.grow_chunk(), 5);
    }

    #[test]
    fn rejects_missing_max_capacity() {
        let result = WatermarkPool::<u32>::builder().min_capacity(1).try_build();

        assert_eq!(result.err(), Some(ConfigError::MissingMaxCapacity));
    }

    #[test]
    fn rejects_equal_watermarks() {
        let result = WatermarkPool::<u32>::builder()
            .max_capacity(4)
            .min_capacity(4)
            .try_build();

        assert_eq!(
            result.err(),
            Some(ConfigError::WatermarkOrder {
                max_capacity: 4,
                min_capacity: 4,
            })
        );
    }

    #[test]
    fn rejects_inverted_watermarks() {
        let result = WatermarkPool::<u32>::builder()
            .max_capacity(2)
            .min_capacity(6)
            .try_build();

        assert!(matches!(
            result.err(),
            Some(ConfigError::WatermarkOrder { .. })
        ));
    }

    #[test]
    fn rejects_zero_max_with_nonzero_min() {
        let result = WatermarkPool::<u32>::builder()
            .max_capacity(0)
            .min_capacity(1)
            .try_build();

        assert!(matches!(
            result.err(),
            Some(ConfigError::WatermarkOrder { .. })
        ));
    }

    #[test]
    fn accepts_the_zero_capacity_pool() {
        let pool = WatermarkPool::<u32>::builder()
            .max_capacity(0)
            .min_capacity(0)
            .build();

        assert_eq!(pool.total_slots(), 0);
        assert_eq!(pool.grow_chunk(), 0);
    }

    #[test]
    #[should_panic(expected = "must be less than max_capacity")]
    fn build_panics_on_misuse() {
        let _pool = WatermarkPool::<u32>::builder()
            .max_capacity(1)
            .min_capacity(1)
            .build();
    }

    #[test]
    fn error_messages_render_the_capacities() {
        let error = ConfigError::WatermarkOrder {
            max_capacity: 2,
            min_capacity: 5,
        };

        assert_eq!(
            error.to_string(),
            "min_capacity (5) must be less than max_capacity (2), unless both are zero"
        );
    }
}
