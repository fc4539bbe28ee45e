// Atomic parameters - Lock-free values shared between control and audio threads
// f32 values are stored as their bit pattern inside an AtomicU32

use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free f32 cell
///
/// Used for meters (written by the audio thread, read by the UI) and for
/// per-channel gains (written by the dispatcher, read by the audio thread).
#[derive(Debug)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            bits: AtomicU32::new(bits),
        }
    }

    pub fn new(value: f32) -> Self {
        Self::from_bits(value.to_bits())
    }

    /// Set the value
    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get the value
    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Store `value` only if it is greater than the current one.
    /// Returns the previous value.
    pub fn fetch_max(&self, value: f32) -> f32 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let current_value = f32::from_bits(current);
            if current_value >= value {
                return current_value;
            }
            match self.bits.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current_value,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF32 {
    fn clone(&self) -> Self {
        Self::new(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_store_load() {
        let value = AtomicF32::new(0.5);
        assert_eq!(value.load(), 0.5);
        value.store(-0.25);
        assert_eq!(value.load(), -0.25);
    }

    #[test]
    fn test_fetch_max() {
        let value = AtomicF32::new(0.2);
        assert_eq!(value.fetch_max(0.1), 0.2);
        assert_eq!(value.load(), 0.2);
        assert_eq!(value.fetch_max(0.8), 0.2);
        assert_eq!(value.load(), 0.8);
    }

    #[test]
    fn test_shared_between_threads() {
        let value = Arc::new(AtomicF32::new(0.0));
        let writer = {
            let value = Arc::clone(&value);
            thread::spawn(move || {
                for i in 0..1000 {
                    value.fetch_max(i as f32);
                }
            })
        };
        writer.join().unwrap();
        assert_eq!(value.load(), 999.0);
    }
}
