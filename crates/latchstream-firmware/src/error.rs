// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Errors raised while loading a firmware image or sizing the ring buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    /// Image does not start with the expected magic word
    BadMagic(u16),
    /// Image format version is not understood
    UnsupportedVersion(u16),
    /// Image is shorter than its header says
    Truncated {
        /// Words required
        expected: usize,
        /// Words available
        actual: usize,
    },
    /// A configuration field is out of range
    InvalidConfig(&'static str),
    /// Priming data is not a whole number of records
    PrimingNotWholeRecords,
    /// At least one priming latch is required to fill the output register
    NoPrimingLatches,
    /// More priming latches than the ring buffer can hold
    TooManyPrimingLatches {
        /// Latches supplied
        requested: usize,
        /// Ring buffer capacity in latches
        capacity: usize,
    },
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(word) => write!(f, "Bad image magic 0x{:04X}", word),
            Self::UnsupportedVersion(v) => write!(f, "Unsupported image version {}", v),
            Self::Truncated { expected, actual } => {
                write!(f, "Truncated image: need {} words, have {}", expected, actual)
            }
            Self::InvalidConfig(msg) => write!(f, "Invalid device configuration: {}", msg),
            Self::PrimingNotWholeRecords => {
                write!(f, "Priming data is not a whole number of latch records")
            }
            Self::NoPrimingLatches => write!(f, "At least one priming latch is required"),
            Self::TooManyPrimingLatches {
                requested,
                capacity,
            } => write!(
                f,
                "{} priming latches requested but the buffer holds {}",
                requested, capacity
            ),
        }
    }
}
