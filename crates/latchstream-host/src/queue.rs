// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

/// Unbounded queue of latches waiting to be sent
///
/// Latches are kept in the chunks they were added in and only split when a
/// batch boundary falls inside one.
#[derive(Debug, Clone)]
pub struct LatchQueue {
    chunks: VecDeque<Vec<u16>>,
    record_width: usize,
    latches: usize,
}

impl LatchQueue {
    /// Create an empty queue of `record_width`-word latches
    pub fn new(record_width: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            record_width: record_width.max(1),
            latches: 0,
        }
    }

    /// Words per latch
    pub fn record_width(&self) -> usize {
        self.record_width
    }

    /// Queued latches
    pub fn len(&self) -> usize {
        self.latches
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.latches == 0
    }

    /// Append whole records; callers check the length
    pub fn push_back(&mut self, words: Vec<u16>) {
        if words.is_empty() {
            return;
        }
        self.latches += words.len() / self.record_width;
        self.chunks.push_back(words);
    }

    /// Put records back at the front (for resending)
    pub fn push_front(&mut self, words: Vec<u16>) {
        if words.is_empty() {
            return;
        }
        self.latches += words.len() / self.record_width;
        self.chunks.push_front(words);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.latches = 0;
    }

    /// Take at least `at_least` latches (fewer if the queue runs out) but
    /// never more than `at_most`
    pub fn take(&mut self, at_least: usize, at_most: usize) -> Vec<u16> {
        let width = self.record_width;
        let mut out = Vec::new();
        let mut got = 0;
        while got < at_least {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let chunk_latches = chunk.len() / width;
            self.latches -= chunk_latches;

            if got + chunk_latches > at_most {
                let keep = at_most - got;
                let leftover = chunk.split_off(keep * width);
                self.push_front(leftover);
            }
            got += chunk.len() / width;
            out.extend_from_slice(&chunk);
        }
        out
    }
}
