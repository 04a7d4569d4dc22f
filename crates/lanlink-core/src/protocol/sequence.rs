//! Thread-safe sequence counter for protocol frame numbering.
//!
//! Every outbound frame carries a monotonically increasing sequence number
//! so receivers can spot drops and duplicates in logs. The counter is
//! lock-free; any task holding a reference may stamp frames concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter for frame sequence numbers.
///
/// Starts at 0 and wraps at `u64::MAX` without panicking.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// Relaxed ordering is sufficient; sequence numbers order frames, they
    /// do not synchronise memory.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without advancing. Diagnostic use only.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero_and_increments() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_sequence_counter_wraps_at_u64_max() {
        let counter = SequenceCounter {
            inner: AtomicU64::new(u64::MAX),
        };
        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_sequence_counter_values_are_unique_across_threads() {
        let counter = Arc::new(SequenceCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..1000).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 8 * 1000);
    }
}
