use std::collections::BTreeMap;

/// Result of offering a chunk to a [`ChunkBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The index was already stored; the first payload is kept.
    Duplicate,
}

/// Sparse, index-ordered accumulator of one session's chunks.
///
/// Duplicates are rejected: the first payload stored under an index wins,
/// so client retries of an already-delivered chunk are harmless.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: BTreeMap<u32, Vec<u8>>,
    buffered_bytes: u64,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sequence_index: u32, payload: Vec<u8>) -> InsertOutcome {
        if self.chunks.contains_key(&sequence_index) {
            return InsertOutcome::Duplicate;
        }
        self.buffered_bytes += payload.len() as u64;
        self.chunks.insert(sequence_index, payload);
        InsertOutcome::Inserted
    }

    /// True iff exactly `expected_count` distinct indices are stored.
    /// A zero count is never complete.
    pub fn is_complete(&self, expected_count: u32) -> bool {
        expected_count > 0 && self.chunks.len() == expected_count as usize
    }

    /// Indices in `0..expected_count` that have not arrived
    pub fn missing(&self, expected_count: u32) -> Vec<u32> {
        (0..expected_count)
            .filter(|index| !self.chunks.contains_key(index))
            .collect()
    }

    /// True if the stored indices are exactly `0..len`
    pub fn is_contiguous(&self) -> bool {
        self.chunks
            .keys()
            .enumerate()
            .all(|(position, index)| *index as usize == position)
    }

    /// Take every stored chunk in ascending index order, leaving the buffer
    /// empty.
    pub fn drain_ordered(&mut self) -> Vec<(u32, Vec<u8>)> {
        self.buffered_bytes = 0;
        std::mem::take(&mut self.chunks).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }
}
