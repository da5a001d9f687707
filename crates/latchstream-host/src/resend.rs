// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use latchstream_protocol::words_from_le_bytes;

use crate::error::StreamError;

/// Recently transmitted batches, kept until the device has certainly stored them
///
/// Each entry is the serialized data of one send-latches command, oldest
/// first. The host never has more latches in flight than the device buffer
/// holds, so anything beyond the newest `capacity` latches can be dropped.
#[derive(Debug, Clone)]
pub struct ResendWindow {
    batches: VecDeque<Vec<u8>>,
    record_bytes: usize,
    latches: usize,
}

impl ResendWindow {
    /// Create an empty window for `record_width`-word latches
    pub fn new(record_width: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            record_bytes: record_width.max(1) * 2,
            latches: 0,
        }
    }

    /// Latches retained
    pub fn len(&self) -> usize {
        self.latches
    }

    /// Nothing retained
    pub fn is_empty(&self) -> bool {
        self.latches == 0
    }

    /// Batches retained
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Remember a transmitted batch
    pub fn push(&mut self, data: Vec<u8>) {
        self.latches += data.len() / self.record_bytes;
        self.batches.push_back(data);
    }

    /// Drop the oldest batches until at most `capacity` latches remain
    pub fn prune(&mut self, capacity: usize) {
        while self.latches > capacity {
            let Some(oldest) = self.batches.pop_front() else {
                break;
            };
            self.latches -= oldest.len() / self.record_bytes;
        }
    }

    /// Pull back the newest `latches` latches as words, oldest first
    ///
    /// Whole batches are popped; if the last one popped reaches further back
    /// than needed, its leading latches (which the device already has) are
    /// dropped.
    pub fn reclaim(&mut self, latches: usize) -> Result<Vec<u16>, StreamError> {
        if latches > self.latches {
            return Err(StreamError::ResendWindowExhausted {
                needed: latches,
                available: self.latches,
            });
        }

        let mut popped = Vec::new();
        let mut got = 0;
        while got < latches {
            let Some(batch) = self.batches.pop_back() else {
                break;
            };
            let batch_latches = batch.len() / self.record_bytes;
            self.latches -= batch_latches;
            got += batch_latches;
            popped.push(batch);
        }

        let excess_bytes = (got - latches) * self.record_bytes;
        let mut bytes = Vec::with_capacity(got * self.record_bytes);
        for batch in popped.iter().rev() {
            bytes.extend_from_slice(batch);
        }
        Ok(words_from_le_bytes(&bytes[excess_bytes..]))
    }
}
