// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Firmware image uploaded by the bootloader.
//!
//! ```text
//! word 0   magic (0x4C53)
//! word 1   format version
//! word 2   record width
//! word 3   ring buffer size in words
//! word 4   status interval (ms)
//! word 5   receive timeout (ms)
//! word 6   priming latch count N
//! word 7.. N × record width priming words
//! ```
//!
//! The first priming latch goes straight into the output register at boot,
//! the rest into the ring buffer.

use alloc::vec::Vec;

use crate::device::DeviceConfig;
use crate::error::FirmwareError;

/// First word of every image
pub const IMAGE_MAGIC: u16 = 0x4C53;
/// Layout version written by this crate
pub const IMAGE_VERSION: u16 = 1;

const HEADER_WORDS: usize = 7;

/// Device configuration plus the latches it boots with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    config: DeviceConfig,
    priming: Vec<u16>,
}

impl FirmwareImage {
    /// Build an image, checking the priming data fits the configuration
    pub fn new(config: DeviceConfig, priming: Vec<u16>) -> Result<Self, FirmwareError> {
        config.validate()?;
        let width = config.record_width as usize;
        if priming.len() % width != 0 {
            return Err(FirmwareError::PrimingNotWholeRecords);
        }
        let latches = priming.len() / width;
        if latches == 0 {
            return Err(FirmwareError::NoPrimingLatches);
        }
        if latches > config.capacity() || latches > u16::MAX as usize {
            return Err(FirmwareError::TooManyPrimingLatches {
                requested: latches,
                capacity: config.capacity(),
            });
        }
        Ok(Self { config, priming })
    }

    /// Device configuration baked into the image
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Priming words, record after record
    pub fn priming_words(&self) -> &[u16] {
        &self.priming
    }

    /// Number of priming latches
    pub fn priming_latches(&self) -> usize {
        self.priming.len() / self.config.record_width as usize
    }

    /// Serialize for upload
    pub fn to_words(&self) -> Vec<u16> {
        let mut words = Vec::with_capacity(HEADER_WORDS + self.priming.len());
        words.extend_from_slice(&[
            IMAGE_MAGIC,
            IMAGE_VERSION,
            self.config.record_width,
            self.config.buffer_words,
            self.config.status_interval_ms,
            self.config.receive_timeout_ms,
            self.priming_latches() as u16,
        ]);
        words.extend_from_slice(&self.priming);
        words
    }

    /// Parse an uploaded image
    pub fn from_words(words: &[u16]) -> Result<Self, FirmwareError> {
        if words.len() < HEADER_WORDS {
            return Err(FirmwareError::Truncated {
                expected: HEADER_WORDS,
                actual: words.len(),
            });
        }
        if words[0] != IMAGE_MAGIC {
            return Err(FirmwareError::BadMagic(words[0]));
        }
        if words[1] != IMAGE_VERSION {
            return Err(FirmwareError::UnsupportedVersion(words[1]));
        }
        let config = DeviceConfig {
            record_width: words[2],
            buffer_words: words[3],
            status_interval_ms: words[4],
            receive_timeout_ms: words[5],
        };
        config.validate()?;
        let expected = HEADER_WORDS + words[6] as usize * config.record_width as usize;
        if words.len() < expected {
            return Err(FirmwareError::Truncated {
                expected,
                actual: words.len(),
            });
        }
        Self::new(config, words[HEADER_WORDS..expected].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn config() -> DeviceConfig {
        DeviceConfig {
            record_width: 2,
            buffer_words: 20,
            status_interval_ms: 25,
            receive_timeout_ms: 2,
        }
    }

    #[test]
    fn test_words_layout() {
        let image = FirmwareImage::new(config(), vec![1, 2, 3, 4]).unwrap();
        assert_eq!(
            image.to_words(),
            vec![IMAGE_MAGIC, IMAGE_VERSION, 2, 20, 25, 2, 2, 1, 2, 3, 4]
        );
        assert_eq!(FirmwareImage::from_words(&image.to_words()), Ok(image));
    }

    #[test]
    fn test_priming_limits() {
        assert_eq!(
            FirmwareImage::new(config(), vec![]),
            Err(FirmwareError::NoPrimingLatches)
        );
        assert_eq!(
            FirmwareImage::new(config(), vec![1, 2, 3]),
            Err(FirmwareError::PrimingNotWholeRecords)
        );
        assert_eq!(
            FirmwareImage::new(config(), vec![0; 22]),
            Err(FirmwareError::TooManyPrimingLatches {
                requested: 11,
                capacity: 10
            })
        );
        assert!(FirmwareImage::new(config(), vec![0; 20]).is_ok());
    }

    #[test]
    fn test_rejects_foreign_images() {
        assert_eq!(
            FirmwareImage::from_words(&[0x1234, 1, 2, 20, 25, 2, 1, 0, 0]),
            Err(FirmwareError::BadMagic(0x1234))
        );
        assert_eq!(
            FirmwareImage::from_words(&[IMAGE_MAGIC, 9, 2, 20, 25, 2, 1, 0, 0]),
            Err(FirmwareError::UnsupportedVersion(9))
        );
        assert_eq!(
            FirmwareImage::from_words(&[IMAGE_MAGIC, 1, 2, 20, 25, 2, 3, 0, 0]),
            Err(FirmwareError::Truncated {
                expected: 13,
                actual: 9
            })
        );
    }
}
