// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # latchstream
//!
//! Streams precomputed controller latch records from a host to embedded
//! playback hardware over a serial link, keeping the device's ring buffer full
//! without ever delivering a latch out of order.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! latchstream = "0.1"  # Default: real serial ports
//! ```
//!
//! ## Feature Flags
//!
//! - **`serial`** (default): `SerialPortLink` and `SerialBootloader::open`
//!   over operating system serial ports
//! - **`file-logging`**: per-run JSON log files
//!
//! ## Usage
//!
//! ```rust,no_run
//! use latchstream::prelude::*;
//! use latchstream::sim::{RigSettings, SimulatedRig};
//!
//! let device = DeviceConfig { record_width: 1, buffer_words: 100, ..DeviceConfig::default() };
//! let options = StreamOptions {
//!     record_width: 1,
//!     device_capacity: device.capacity(),
//!     priming_latches: Some(10),
//!     ..StreamOptions::default()
//! };
//! let mut streamer = LatchStreamer::new(options)?;
//! let mut source = MemorySource::new((0..250).collect(), 1);
//! let pump = PumpSettings::default();
//! let exhausted = fill_queue(&mut streamer, &mut source, 10, &pump)?;
//!
//! let mut rig = SimulatedRig::new(RigSettings::default());
//! streamer.connect(rig.bootloader(), &ReferenceFirmware::new(device), NullObserver)?;
//! rig.run(&mut streamer, &mut source, &pump, exhausted)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Wire: latchstream-protocol                             │
//! │  (packets, CRC-16/KERMIT, status scanner)               │
//! └─────────────────────────────────────────────────────────┘
//!              ↓                              ↓
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │  Device: latchstream-     │  │  Host: latchstream-host  │
//! │  firmware (ring buffer,   │  │  (LatchStreamer,         │
//! │  receiver, status)        │  │  bootstrap, reporter)    │
//! └───────────────────────────┘  └──────────────────────────┘
//!              ↓                              ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  This crate: reference firmware image + simulation rig  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

pub mod latch_file;
pub mod reference;
pub mod sim;

pub use latchstream_config as config;
pub use latchstream_firmware as firmware;
pub use latchstream_host as host;
pub use latchstream_observability as observability;
pub use latchstream_protocol as protocol;

pub use latch_file::LatchFile;
pub use reference::ReferenceFirmware;

/// Version of the latchstream umbrella crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::reference::ReferenceFirmware;
    pub use latchstream_firmware::{Device, DeviceConfig, FirmwareImage};
    pub use latchstream_host::{
        fill_queue, stream_loop, ConnectionState, LatchSource, LatchStreamer, MemorySource,
        NullObserver, ProgressReporter, PumpSettings, StepOutcome, StreamError, StreamEvent,
        StreamObserver, StreamOptions,
    };
    pub use latchstream_protocol::ErrorCode;
}
