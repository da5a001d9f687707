// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the host streamer

use latchstream_protocol::ErrorCode;
use thiserror::Error;

/// Serial link failures
#[derive(Error, Debug)]
pub enum LinkError {
    /// I/O error from the operating system
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error opening or configuring a serial port
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// The other end went away
    #[error("Link closed")]
    Closed,
}

/// Bootloader and firmware download failures
#[derive(Error, Debug)]
pub enum BootError {
    /// Target did not answer in time
    #[error("Bootloader timeout: {0}")]
    Timeout(String),

    /// Response checksum did not validate
    #[error("Bad CRC: expected 0 but received 0x{residue:04X}")]
    BadCrc {
        /// Register value after checking the response
        residue: u16,
    },

    /// Target answered with an error result
    #[error("Target said '{0}'")]
    TargetRefused(String),

    /// Response did not start with the expected word
    #[error("Unexpected response word 0x{0:04X}")]
    UnexpectedResponse(u16),

    /// Bootloader reports a version this host does not speak
    #[error("Wrong bootloader version {found} (expected {expected})")]
    WrongVersion {
        /// Version reported by the target
        found: u16,
        /// Version this host expects
        expected: u16,
    },

    /// Read-back did not match what was written
    #[error("Firmware verification failed at word {offset}")]
    VerificationFailed {
        /// First mismatching word
        offset: usize,
    },

    /// Command issued before connecting
    #[error("Not connected to target")]
    NotConnected,

    /// Firmware image could not be built
    #[error("Firmware image error: {0}")]
    Image(String),

    /// Transport failure
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Streamer failures
#[derive(Error, Debug)]
pub enum StreamError {
    /// Operation needs a connection
    #[error("Not connected")]
    NotConnected,

    /// `connect` called twice
    #[error("Already connected")]
    AlreadyConnected,

    /// Latch data is not a whole number of records
    #[error("{words} words is not a whole number of {record_width}-word latches")]
    InvalidLatches {
        /// Words supplied
        words: usize,
        /// Words per latch
        record_width: usize,
    },

    /// Not enough queued latches to prime the device
    #[error("{requested} priming latches requested but only {available} available in the queue")]
    NotEnoughPriming {
        /// Priming latches needed
        requested: usize,
        /// Latches queued
        available: usize,
    },

    /// The device reported a fatal error
    #[error("Fatal device error: {code} at stream position {device_pos}")]
    DeviceFault {
        /// Error reported
        code: ErrorCode,
        /// Device stream position at the time
        device_pos: u16,
    },

    /// The device asked for more latches back than the resend window holds
    #[error("Cannot rewind {needed} latches, only {available} retained")]
    ResendWindowExhausted {
        /// Latches the device is missing
        needed: usize,
        /// Latches retained
        available: usize,
    },

    /// Streaming options are inconsistent
    #[error("Invalid stream options: {0}")]
    InvalidOptions(String),

    /// The latch producer failed before reaching the end of its input
    #[error("Latch source error: {0}")]
    Source(#[source] std::io::Error),

    /// Framing failure
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport failure
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Bootstrap failure
    #[error(transparent)]
    Bootstrap(#[from] BootError),
}

impl From<latchstream_protocol::ProtocolError> for StreamError {
    fn from(err: latchstream_protocol::ProtocolError) -> Self {
        StreamError::Protocol(err.to_string())
    }
}

/// Result type for streamer operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Result type for bootloader operations
pub type BootResult<T> = Result<T, BootError>;
