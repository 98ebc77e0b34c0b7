//! Lock-free floating point cell.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Create a new atomic f64.
    #[inline]
    pub const fn new(val: f64) -> Self {
        Self {
            bits: AtomicU64::new(val.to_bits()),
        }
    }

    /// Load the value.
    #[inline]
    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.bits.load(ordering))
    }

    /// Store a value.
    #[inline]
    pub fn store(&self, val: f64, ordering: Ordering) {
        self.bits.store(val.to_bits(), ordering);
    }

    /// Compare and exchange.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: f64,
        new: f64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<f64, f64> {
        self.bits
            .compare_exchange(current.to_bits(), new.to_bits(), success, failure)
            .map(f64::from_bits)
            .map_err(f64::from_bits)
    }

    /// Add a value atomically (using CAS loop). Returns the previous value.
    #[inline]
    pub fn fetch_add(&self, val: f64, ordering: Ordering) -> f64 {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            match self.compare_exchange(current, current + val, ordering, Ordering::Relaxed) {
                Ok(v) => return v,
                Err(v) => current = v,
            }
        }
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}
