// src/output/tail.rs

//! Bounded retention of the most recent output bytes.

use std::collections::VecDeque;

/// Fixed-capacity byte ring.
///
/// Retains at most `capacity` of the most recently written bytes. Writing past
/// capacity evicts the oldest bytes first; it never fails. Storage grows with
/// the bytes actually retained, not with `capacity`.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    capacity: usize,
    buf: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        // Only the last `capacity` bytes of an oversized write can survive.
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };

        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(bytes);
    }

    /// Copy of the retained bytes, oldest first.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    /// Retained bytes decoded lossily and split into lines.
    ///
    /// The first line may be partial if its head was evicted.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.contents())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
