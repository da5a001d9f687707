// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

#![no_std]
#![warn(missing_docs)]

//! # Latch Stream Firmware
//!
//! Device side of the latch streaming protocol, written against small HAL
//! traits so it runs on a microcontroller or inside a host-side simulation.
//!
//! This crate provides:
//! - **HAL traits** (`hal` module) - serial port, clock and latch output register
//! - **Ring buffer** (`ring` module) - fixed-capacity store of latch records
//! - **Receiver** (`receiver` module) - byte-at-a-time command parser
//! - **Device** (`device` module) - the main loop tying them together and
//!   reporting status
//! - **Firmware image** (`image` module) - what the bootloader uploads
//! - **Simulation doubles** (`sim` module) - in-memory serial port, console and clock
//!
//! ## Usage
//!
//! ```no_run
//! use latchstream_firmware::prelude::*;
//! use latchstream_firmware::sim::{MemorySerial, SimulatedConsole};
//!
//! let image = FirmwareImage::new(DeviceConfig::default(), vec![0; 5 * 16]).unwrap();
//! let mut device = Device::boot(&image, MemorySerial::new(), SimulatedConsole::new(), 0).unwrap();
//! loop {
//!     # let now_us = 0;
//!     device.poll(now_us);
//! }
//! ```

extern crate alloc;

/// Device main loop and status reporting
pub mod device;

/// Error types
pub mod error;

/// Hardware abstraction traits
pub mod hal;

/// Firmware image layout
pub mod image;

/// Command receive state machine
pub mod receiver;

/// Latch record ring buffer
pub mod ring;

/// In-memory implementations of the HAL traits
pub mod sim;

pub use device::{Device, DeviceConfig};
pub use error::FirmwareError;
pub use image::{FirmwareImage, IMAGE_MAGIC, IMAGE_VERSION};
pub use ring::LatchRing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::device::{Device, DeviceConfig};
    pub use crate::hal::{LatchInterface, SerialIO, TimeProvider};
    pub use crate::image::FirmwareImage;
    pub use latchstream_protocol::ErrorCode;
}
