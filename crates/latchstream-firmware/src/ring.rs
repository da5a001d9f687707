// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use alloc::vec;
use alloc::vec::Vec;

use crate::error::FirmwareError;

/// Circular store of fixed-width latch records
///
/// `head` is where the next received record goes and `tail` is the next
/// record to hand to the console. `head == tail` means empty, and one slot is
/// always left vacant so that full is `head == tail - 1`.
///
/// Incoming batches are written past `head` with [`stage_word`](Self::stage_word)
/// and only become visible once [`commit`](Self::commit) moves `head`.
#[derive(Debug, Clone)]
pub struct LatchRing {
    words: Vec<u16>,
    record_width: usize,
    capacity: usize,
    head: usize,
    tail: usize,
}

impl LatchRing {
    /// Size a ring from a word budget; leftover words are unused
    pub fn new(buffer_words: usize, record_width: usize) -> Result<Self, FirmwareError> {
        if record_width == 0 {
            return Err(FirmwareError::InvalidConfig("record width is zero"));
        }
        let capacity = buffer_words / record_width;
        if capacity < 2 {
            return Err(FirmwareError::InvalidConfig(
                "buffer must hold at least two records",
            ));
        }
        Ok(Self {
            words: vec![0; capacity * record_width],
            record_width,
            capacity,
            head: 0,
            tail: 0,
        })
    }

    /// Number of record slots (one of which is always vacant)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Words per record
    pub fn record_width(&self) -> usize {
        self.record_width
    }

    /// Committed records waiting for the console
    pub fn len(&self) -> usize {
        (self.head + self.capacity - self.tail) % self.capacity
    }

    /// No committed records
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// No free slots
    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Records that can still be accepted
    pub fn free(&self) -> usize {
        self.capacity - 1 - self.len()
    }

    /// Oldest committed record
    pub fn front(&self) -> Option<&[u16]> {
        if self.is_empty() {
            return None;
        }
        let at = self.tail * self.record_width;
        Some(&self.words[at..at + self.record_width])
    }

    /// Drop the oldest committed record
    pub fn advance_tail(&mut self) {
        if !self.is_empty() {
            self.tail = (self.tail + 1) % self.capacity;
        }
    }

    /// Append and commit one record
    ///
    /// # Returns
    /// `false` if the ring is full or the record has the wrong width
    pub fn push(&mut self, record: &[u16]) -> bool {
        if self.is_full() || record.len() != self.record_width {
            return false;
        }
        let at = self.head * self.record_width;
        self.words[at..at + self.record_width].copy_from_slice(record);
        self.head = (self.head + 1) % self.capacity;
        true
    }

    /// Write one word of an uncommitted batch
    ///
    /// `offset` counts words from the current `head`. Words beyond the free
    /// space are ignored.
    pub fn stage_word(&mut self, offset: usize, word: u16) {
        if offset >= self.free() * self.record_width {
            return;
        }
        let slot = (self.head + offset / self.record_width) % self.capacity;
        self.words[slot * self.record_width + offset % self.record_width] = word;
    }

    /// Make `latches` staged records visible
    ///
    /// # Returns
    /// `false` (and nothing committed) if that many slots are not free
    pub fn commit(&mut self, latches: usize) -> bool {
        if latches > self.free() {
            return false;
        }
        self.head = (self.head + latches) % self.capacity;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing() {
        let ring = LatchRing::new(32256, 5).unwrap();
        assert_eq!(ring.capacity(), 6451);
        assert_eq!(ring.free(), 6450);
        assert!(ring.is_empty());
        assert!(LatchRing::new(10, 0).is_err());
        assert!(LatchRing::new(5, 5).is_err());
    }

    #[test]
    fn test_one_slot_stays_vacant() {
        let mut ring = LatchRing::new(4, 1).unwrap();
        assert!(ring.push(&[1]));
        assert!(ring.push(&[2]));
        assert!(ring.push(&[3]));
        assert!(ring.is_full());
        assert!(!ring.push(&[4]));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut ring = LatchRing::new(6, 2).unwrap();
        for round in 0..5u16 {
            assert!(ring.push(&[round, round + 100]));
            assert!(ring.push(&[round + 1, round + 101]));
            assert_eq!(ring.front(), Some(&[round, round + 100][..]));
            ring.advance_tail();
            assert_eq!(ring.front(), Some(&[round + 1, round + 101][..]));
            ring.advance_tail();
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_staged_words_invisible_until_commit() {
        let mut ring = LatchRing::new(5, 1).unwrap();
        assert!(ring.push(&[9]));
        ring.stage_word(0, 10);
        ring.stage_word(1, 11);
        assert_eq!(ring.len(), 1);
        assert!(ring.commit(2));
        ring.advance_tail();
        assert_eq!(ring.front(), Some(&[10][..]));
        ring.advance_tail();
        assert_eq!(ring.front(), Some(&[11][..]));
    }

    #[test]
    fn test_commit_beyond_free_is_refused() {
        let mut ring = LatchRing::new(3, 1).unwrap();
        assert!(!ring.commit(3));
        assert!(ring.commit(2));
        assert!(ring.is_full());
    }

    #[test]
    fn test_stage_ignores_overflow() {
        let mut ring = LatchRing::new(3, 1).unwrap();
        assert!(ring.push(&[1]));
        ring.stage_word(5, 99);
        ring.advance_tail();
        assert!(ring.is_empty());
    }
}
