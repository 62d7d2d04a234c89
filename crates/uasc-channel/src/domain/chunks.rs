//! Reassembly of multi-chunk messages.
//!
//! Intermediate chunks are held per request id until the final chunk
//! arrives. A repeated sequence number within one request is dropped at
//! append time, and the number of held chunks per request is bounded.

use crate::domain::error::ChannelError;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug)]
struct HeldChunk {
    sequence_number: u32,
    data: Vec<u8>,
}

/// Intermediate chunks keyed by request id.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    chunks: HashMap<u32, Vec<HeldChunk>>,
    /// Maximum intermediate chunks per request, 0 for no limit
    max_chunk_count: u32,
}

impl ChunkAccumulator {
    /// Accumulator enforcing `max_chunk_count` (0 disables the limit).
    pub fn new(max_chunk_count: u32) -> Self {
        Self {
            chunks: HashMap::new(),
            max_chunk_count,
        }
    }

    /// Hold an intermediate chunk.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::TooManyChunks` and discards everything held for
    /// `request_id` once the limit is exceeded.
    pub fn append(
        &mut self,
        request_id: u32,
        sequence_number: u32,
        data: Vec<u8>,
    ) -> Result<(), ChannelError> {
        let held = self.chunks.entry(request_id).or_default();
        if held.iter().any(|c| c.sequence_number == sequence_number) {
            warn!(request_id, sequence_number, "Dropping duplicate chunk");
            return Ok(());
        }
        held.push(HeldChunk {
            sequence_number,
            data,
        });

        let count = held.len();
        if self.max_chunk_count > 0 && count > self.max_chunk_count as usize {
            self.chunks.remove(&request_id);
            warn!(
                request_id,
                count,
                limit = self.max_chunk_count,
                "Too many chunks, discarding message"
            );
            return Err(ChannelError::TooManyChunks {
                request_id,
                limit: self.max_chunk_count,
            });
        }

        debug!(request_id, sequence_number, count, "Held intermediate chunk");
        Ok(())
    }

    /// Merge held chunks and the final chunk in arrival order.
    pub fn finish(&mut self, request_id: u32, sequence_number: u32, data: Vec<u8>) -> Vec<u8> {
        let Some(held) = self.chunks.remove(&request_id) else {
            return data;
        };

        let total = held.iter().map(|c| c.data.len()).sum::<usize>() + data.len();
        let mut merged = Vec::with_capacity(total);
        for chunk in &held {
            merged.extend_from_slice(&chunk.data);
        }
        if held.iter().any(|c| c.sequence_number == sequence_number) {
            warn!(request_id, sequence_number, "Dropping duplicate final chunk");
        } else {
            merged.extend_from_slice(&data);
        }
        merged
    }

    /// Discard everything held for `request_id`. Returns the number of chunks dropped.
    pub fn discard(&mut self, request_id: u32) -> usize {
        self.chunks.remove(&request_id).map_or(0, |held| held.len())
    }

    /// Number of chunks held for `request_id`.
    pub fn held(&self, request_id: u32) -> usize {
        self.chunks.get(&request_id).map_or(0, Vec::len)
    }

    /// Number of request ids with held chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drop all held chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_final_chunk_passes_through() {
        let mut acc = ChunkAccumulator::new(4);
        assert_eq!(acc.finish(7, 1, b"whole".to_vec()), b"whole");
        assert!(acc.is_empty());
    }

    #[test]
    fn test_merge_in_arrival_order() {
        let mut acc = ChunkAccumulator::new(4);
        acc.append(7, 10, b"ab".to_vec()).unwrap();
        acc.append(7, 11, b"cd".to_vec()).unwrap();

        assert_eq!(acc.finish(7, 12, b"ef".to_vec()), b"abcdef");
        assert_eq!(acc.held(7), 0);
    }

    #[test]
    fn test_duplicate_sequence_number_dropped() {
        let mut acc = ChunkAccumulator::new(4);
        acc.append(7, 10, b"ab".to_vec()).unwrap();
        acc.append(7, 11, b"cd".to_vec()).unwrap();
        acc.append(7, 10, b"ab".to_vec()).unwrap();
        assert_eq!(acc.held(7), 2);

        assert_eq!(acc.finish(7, 12, b"ef".to_vec()), b"abcdef");
    }

    #[test]
    fn test_duplicate_final_dropped() {
        let mut acc = ChunkAccumulator::new(4);
        acc.append(7, 10, b"ab".to_vec()).unwrap();
        assert_eq!(acc.finish(7, 10, b"ab".to_vec()), b"ab");
    }

    #[test]
    fn test_requests_are_independent() {
        let mut acc = ChunkAccumulator::new(4);
        acc.append(1, 1, b"one-".to_vec()).unwrap();
        acc.append(2, 2, b"two-".to_vec()).unwrap();

        assert_eq!(acc.finish(2, 3, b"end".to_vec()), b"two-end");
        assert_eq!(acc.finish(1, 4, b"end".to_vec()), b"one-end");
    }

    #[test]
    fn test_chunk_limit_clears_request() {
        let mut acc = ChunkAccumulator::new(2);
        acc.append(9, 1, vec![1]).unwrap();
        acc.append(9, 2, vec![2]).unwrap();

        let err = acc.append(9, 3, vec![3]).unwrap_err();
        assert_eq!(
            err,
            ChannelError::TooManyChunks {
                request_id: 9,
                limit: 2
            }
        );
        assert_eq!(acc.held(9), 0);
        assert_eq!(acc.finish(9, 4, vec![4]), vec![4]);
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let mut acc = ChunkAccumulator::new(0);
        for seq in 1..=1000 {
            acc.append(1, seq, vec![0]).unwrap();
        }
        assert_eq!(acc.held(1), 1000);
    }

    #[test]
    fn test_discard() {
        let mut acc = ChunkAccumulator::new(4);
        acc.append(5, 1, vec![1]).unwrap();
        acc.append(5, 2, vec![2]).unwrap();

        assert_eq!(acc.discard(5), 2);
        assert_eq!(acc.discard(5), 0);
        assert!(acc.is_empty());
    }
}
