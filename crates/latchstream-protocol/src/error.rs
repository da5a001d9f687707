// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Errors produced while decoding or encoding packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No header could be found; this many bytes were thrown away
    Framing {
        /// Bytes discarded while scanning
        discarded: usize,
    },
    /// Trailing checksum did not validate
    Checksum {
        /// Register value after feeding the frame and its CRC (zero when valid)
        residue: u16,
    },
    /// Frame shorter than its fixed layout
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },
    /// Command word carried an unexpected parameter count or response code
    BadCommandWord(u16),
    /// Opcode is not part of the vocabulary
    UnknownOpcode(u8),
    /// Latch data could not be framed
    InvalidLatchData(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing { discarded } => {
                write!(f, "No packet header found ({} bytes discarded)", discarded)
            }
            Self::Checksum { residue } => {
                write!(f, "Bad checksum: expected 0 but got 0x{:04X}", residue)
            }
            Self::Truncated { expected, actual } => {
                write!(f, "Truncated packet: need {} bytes, have {}", expected, actual)
            }
            Self::BadCommandWord(word) => write!(f, "Unexpected command word 0x{:04X}", word),
            Self::UnknownOpcode(op) => write!(f, "Unknown opcode 0x{:02X}", op),
            Self::InvalidLatchData(msg) => write!(f, "Invalid latch data: {}", msg),
        }
    }
}

/// Result type for codec operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
