// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `latchstream.toml`. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LatchstreamConfig {
    pub link: LinkConfig,
    pub stream: StreamConfig,
    pub device: DeviceSettings,
    pub bootstrap: BootstrapConfig,
    pub logging: LoggingConfig,
}

/// Serial link used for streaming once the firmware is running
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout while streaming
    pub read_timeout_ms: u64,
    /// Largest read per step
    pub read_chunk: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 2_000_000,
            read_timeout_ms: 1,
            read_chunk: 65536,
        }
    }
}

/// Host flow control and the stream loop
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Smallest batch worth sending
    pub min_batch: usize,
    /// Largest batch sent in one command
    pub max_batch: usize,
    /// Repeats of an error already rewound for that are not rewound again
    pub stale_status_limit: usize,
    /// Latches downloaded with the firmware; `None` fills the device buffer
    pub priming_latches: Option<usize>,
    /// Sleep between stream loop iterations
    pub step_period_ms: u64,
    /// Refill the queue when it drops below this many latches
    pub queue_high_water: usize,
    /// Block on the source while the queue is below this many latches
    pub queue_low_water: usize,
    /// Latches requested from the source per refill
    pub refill_latches: usize,
    /// Progress line period
    pub report_period_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_batch: 20,
            max_batch: 200,
            stale_status_limit: 4,
            priming_latches: None,
            step_period_ms: 10,
            queue_high_water: 10_000,
            queue_low_water: 1_000,
            refill_latches: 10_000,
            report_period_ms: 500,
        }
    }
}

/// Parameters compiled into the firmware image
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Words per latch record
    pub record_width: u16,
    /// Ring buffer size in words
    pub buffer_words: u16,
    pub status_interval_ms: u16,
    pub receive_timeout_ms: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            record_width: 5,
            buffer_words: 0x8000 - 0x200,
            status_interval_ms: 25,
            receive_timeout_ms: 2,
        }
    }
}

impl DeviceSettings {
    /// Ring buffer capacity in latches
    pub fn capacity(&self) -> usize {
        if self.record_width == 0 {
            return 0;
        }
        (self.buffer_words / self.record_width) as usize
    }
}

/// Bootloader connection and firmware download (over the `[link]` port)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Per-command response timeout
    pub timeout_ms: u64,
    /// How long to wait for the first hello before asking for a reset
    pub connect_timeout_ms: u64,
    /// Address the firmware image is written to and started from
    pub load_address: u16,
    /// Where the bootloader keeps its identity block
    pub rom_info_address: u16,
    pub rom_info_words: u16,
    pub expected_version: u16,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 200,
            connect_timeout_ms: 1_000,
            load_address: 0,
            rom_info_address: 0xFFB8,
            rom_info_words: 8,
            expected_version: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,
    /// `text` or `json`
    pub format: String,
    /// Also write log files (needs the `file-logging` feature)
    pub file: bool,
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: false,
            directory: PathBuf::from("./logs"),
        }
    }
}
