//! Counter helpers shared between event listener threads and samplers.

use std::sync::atomic::{AtomicI64, Ordering};

/// An integer counter that may be mutated from several threads at once.
///
/// Event callbacks increment or decrement it while the sampling thread reads
/// and resets it with a single [`exchange`](Self::exchange), so no update is
/// lost or counted twice between the read and the reset.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicI64);

impl AtomicCounter {
    /// Creates a counter starting at `value`.
    pub const fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    /// Adds one and returns the new value.
    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Subtracts one and returns the new value.
    pub fn decrement(&self) -> i64 {
        self.0.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Adds `delta` and returns the new value.
    pub fn add(&self, delta: i64) -> i64 {
        self.0.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Current value.
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Stores `value` and returns the previous value.
    pub fn exchange(&self, value: i64) -> i64 {
        self.0.swap(value, Ordering::AcqRel)
    }

    /// Resets the counter to zero if it went negative.
    ///
    /// Returns the value after correction. Increments racing with the reset
    /// are kept: the reset only applies while the value is still negative.
    pub fn reset_if_negative(&self) -> i64 {
        let mut current = self.value();
        while current < 0 {
            match self
                .0
                .compare_exchange(current, 0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return 0,
                Err(actual) => current = actual,
            }
        }
        current
    }
}

/// Clamps a derived count to zero.
pub fn non_negative(value: i64) -> i64 {
    value.max(0)
}

/// Difference between two readings of a monotonic counter, clamped to zero.
pub fn counter_delta(current: i64, previous: i64) -> i64 {
    non_negative(current.saturating_sub(previous))
}

/// Reads `values[index]`, defaulting to zero when the source returned fewer
/// elements than expected.
pub fn element_or_default<T: Copy + Default>(values: &[T], index: usize) -> T {
    values.get(index).copied().unwrap_or_default()
}
