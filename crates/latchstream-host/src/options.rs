// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use latchstream_config::LatchstreamConfig;

use crate::error::{StreamError, StreamResult};

/// Streamer tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Words per latch
    pub record_width: usize,
    /// Device ring buffer capacity in latches
    pub device_capacity: usize,
    /// Latches embedded in the firmware; `None` uses the device capacity
    pub priming_latches: Option<usize>,
    /// Don't bother sending fewer than this many latches
    pub min_batch: usize,
    /// Cap on latches per send-latches command
    pub max_batch: usize,
    /// Repeats of an already-rewound error to ignore before rewinding again
    ///
    /// Covers statuses the device sent before the resent latches reached
    /// it. Zero rewinds on every error status.
    pub stale_status_limit: usize,
    /// Largest read per step
    pub read_chunk: usize,
    /// Firmware load and start address
    pub load_address: u16,
    /// First bootloader connection attempt gives up after this long
    pub connect_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            record_width: 5,
            device_capacity: 6451,
            priming_latches: None,
            min_batch: 20,
            max_batch: 200,
            stale_status_limit: 4,
            read_chunk: 65536,
            load_address: 0,
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl StreamOptions {
    /// Options matching a loaded configuration
    pub fn from_config(config: &LatchstreamConfig) -> Self {
        Self {
            record_width: usize::from(config.device.record_width),
            device_capacity: config.device.capacity(),
            priming_latches: config.stream.priming_latches,
            min_batch: config.stream.min_batch,
            max_batch: config.stream.max_batch,
            stale_status_limit: config.stream.stale_status_limit,
            read_chunk: config.link.read_chunk,
            load_address: config.bootstrap.load_address,
            connect_timeout: Duration::from_millis(config.bootstrap.connect_timeout_ms),
        }
    }

    /// Check the options are usable together
    pub fn validate(&self) -> StreamResult<()> {
        if self.record_width == 0 {
            return Err(StreamError::InvalidOptions("record width is zero".into()));
        }
        if self.device_capacity == 0 {
            return Err(StreamError::InvalidOptions("device capacity is zero".into()));
        }
        if self.min_batch == 0 || self.max_batch < self.min_batch {
            return Err(StreamError::InvalidOptions(format!(
                "batch bounds {}..={} are invalid",
                self.min_batch, self.max_batch
            )));
        }
        if self.max_batch > usize::from(u16::MAX) {
            return Err(StreamError::InvalidOptions(
                "max batch does not fit a 16-bit latch count".into(),
            ));
        }
        if self.read_chunk == 0 {
            return Err(StreamError::InvalidOptions("read chunk is zero".into()));
        }
        Ok(())
    }

    /// Priming latch count after defaulting and clamping to the capacity
    pub fn effective_priming(&self) -> StreamResult<usize> {
        let requested = self.priming_latches.unwrap_or(self.device_capacity);
        if requested == 0 {
            return Err(StreamError::InvalidOptions(
                "at least one priming latch is required".into(),
            ));
        }
        Ok(requested.min(self.device_capacity))
    }
}
