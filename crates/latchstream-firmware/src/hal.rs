// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction for the playback device.
//!
//! The device loop only needs three things from the platform: a UART, a
//! monotonic clock, and the latch output register that the console reads.

/// Serial I/O abstraction for UART communication
pub trait SerialIO {
    /// Platform-specific error type
    type Error: core::fmt::Debug;

    /// Write bytes to the serial port
    ///
    /// # Returns
    /// Number of bytes accepted (may be fewer than `data.len()`)
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Read bytes from the serial port without blocking
    ///
    /// # Returns
    /// Number of bytes read (0 if nothing is waiting)
    ///
    /// An error means bytes were lost (framing error, overrun).
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Flush the transmit buffer
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Monotonic clock
pub trait TimeProvider {
    /// Current time in microseconds since boot
    fn get_time_us(&self) -> u64;
}

/// Latch output register shared with the console
///
/// The console latches whatever record is in the register and then raises the
/// latch flag; the device must replace the record before the next latch.
pub trait LatchInterface {
    /// A latch event happened since the last [`acknowledge`](Self::acknowledge)
    fn latch_pending(&self) -> bool;

    /// Put the next record into the output register
    fn load_record(&mut self, record: &[u16]);

    /// Clear the latch flag
    ///
    /// # Returns
    /// `true` if a further latch event fired before the record was replaced
    fn acknowledge(&mut self) -> bool;
}
