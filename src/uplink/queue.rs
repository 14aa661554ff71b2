//! Bounded FIFO for audio chunks awaiting an open connection.

use std::collections::VecDeque;

/// Fixed-capacity chunk buffer with drop-oldest overflow.
///
/// When the transport is down, chunks pile up here. On overflow the oldest
/// chunk is evicted before the new one is appended, so the buffer always
/// holds the most recent speech.
pub struct ChunkQueue {
    chunks: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append a chunk, evicting the oldest one first if the queue is full.
    /// Returns the evicted chunk, if any.
    pub fn push(&mut self, chunk: Vec<u8>) -> Option<Vec<u8>> {
        let evicted = if self.chunks.len() >= self.capacity {
            self.chunks.pop_front()
        } else {
            None
        };
        self.chunks.push_back(chunk);
        evicted
    }

    /// Remove and return the oldest chunk.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.chunks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.chunks.shrink_to_fit();
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().cloned().collect()
    }
}
