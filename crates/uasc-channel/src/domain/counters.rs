//! Sequence number and request id counters.
//!
//! Neither counter ever yields 0. Sequence numbers wrap back to 1 well before
//! 32-bit overflow, leaving the top 1024 values unused.

/// Largest sequence number emitted before wrapping.
pub const SEQUENCE_NUMBER_WRAP: u32 = u32::MAX - 1023;

/// Per-chunk sequence number counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u32);

impl SequenceCounter {
    /// Counter whose next value follows `last`.
    pub fn starting_after(last: u32) -> Self {
        Self(last)
    }

    /// Advance and return the new sequence number.
    pub fn next(&mut self) -> u32 {
        let next = self.0.wrapping_add(1);
        self.0 = if next == 0 || next > SEQUENCE_NUMBER_WRAP {
            1
        } else {
            next
        };
        self.0
    }

    /// Last emitted value, 0 before the first call to `next`.
    pub fn current(&self) -> u32 {
        self.0
    }
}

/// Non-zero wrapping counter used for request ids and request handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdCounter(u32);

impl IdCounter {
    /// Counter whose next value follows `seed`.
    pub fn starting_after(seed: u32) -> Self {
        Self(seed)
    }

    /// Advance and return the new id.
    pub fn next(&mut self) -> u32 {
        self.0 = match self.0.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.0
    }

    /// Last emitted value.
    pub fn current(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let mut seq = SequenceCounter::default();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn test_sequence_wraps_before_reserved_band() {
        let mut seq = SequenceCounter::starting_after(SEQUENCE_NUMBER_WRAP - 1);
        assert_eq!(seq.next(), SEQUENCE_NUMBER_WRAP);
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_request_id_skips_zero() {
        let mut id = IdCounter::starting_after(u32::MAX - 1);
        assert_eq!(id.next(), u32::MAX);
        assert_eq!(id.next(), 1);
        assert_eq!(id.next(), 2);
    }

    proptest! {
        #[test]
        fn sequence_never_zero_and_resumes_at_one(
            start in (SEQUENCE_NUMBER_WRAP - 2048)..=u32::MAX,
            steps in 1usize..4096
        ) {
            let mut seq = SequenceCounter::starting_after(start);
            let mut previous = seq.current();
            for _ in 0..steps {
                let value = seq.next();
                prop_assert!(value != 0);
                prop_assert!(value <= SEQUENCE_NUMBER_WRAP);
                prop_assert!(value == previous.wrapping_add(1) || value == 1);
                previous = value;
            }
        }

        #[test]
        fn request_id_never_zero(start in any::<u32>(), steps in 1usize..64) {
            let mut id = IdCounter::starting_after(start);
            for _ in 0..steps {
                prop_assert!(id.next() != 0);
            }
        }
    }
}
