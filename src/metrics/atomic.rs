//! Lock-free storage for floating point metric values.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell stored as raw bits in an [`AtomicU64`].
///
/// Writers publish with `Release` and readers observe with `Acquire` so a
/// value stored before a flag flip is visible to whoever wins the flag.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()) }
    }

    #[inline]
    pub(crate) fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f64() {
        let value = AtomicF64::new(0.0);
        assert_eq!(value.load(), 0.0);

        value.store(100.5);
        assert_eq!(value.load(), 100.5);

        value.store(-3.25);
        assert_eq!(value.load(), -3.25);
    }

    #[test]
    fn test_atomic_f64_thread_safe() {
        let value = std::sync::Arc::new(AtomicF64::new(0.0));
        let clone = value.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..1000 {
                clone.store(i as f64);
            }
        });
        handle.join().unwrap();

        assert_eq!(value.load(), 999.0);
    }
}
