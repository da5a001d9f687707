// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Firmware images for the device logic in `latchstream-firmware`.

use latchstream_config::DeviceSettings;
use latchstream_firmware::{DeviceConfig, FirmwareImage};
use latchstream_host::{BootError, BootResult, FirmwareBuilder};

/// Builds [`FirmwareImage`] words for a fixed device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceFirmware {
    config: DeviceConfig,
}

impl ReferenceFirmware {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(DeviceConfig {
            record_width: settings.record_width,
            buffer_words: settings.buffer_words,
            status_interval_ms: settings.status_interval_ms,
            receive_timeout_ms: settings.receive_timeout_ms,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl FirmwareBuilder for ReferenceFirmware {
    fn build(&self, priming: &[u16], record_width: usize) -> BootResult<Vec<u16>> {
        if record_width != usize::from(self.config.record_width) {
            return Err(BootError::Image(format!(
                "streamer uses {} words per latch, firmware expects {}",
                record_width, self.config.record_width
            )));
        }
        let image = FirmwareImage::new(self.config, priming.to_vec())
            .map_err(|e| BootError::Image(e.to_string()))?;
        Ok(image.to_words())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firmware() -> ReferenceFirmware {
        ReferenceFirmware::new(DeviceConfig {
            record_width: 2,
            buffer_words: 20,
            ..DeviceConfig::default()
        })
    }

    #[test]
    fn test_image_round_trips_priming() {
        let words = firmware().build(&[1, 2, 3, 4], 2).unwrap();
        let image = FirmwareImage::from_words(&words).unwrap();
        assert_eq!(image.priming_words(), &[1, 2, 3, 4]);
        assert_eq!(image.config(), firmware().config());
    }

    #[test]
    fn test_width_mismatch() {
        assert!(matches!(firmware().build(&[1, 2, 3], 3), Err(BootError::Image(_))));
    }

    #[test]
    fn test_too_many_priming_latches() {
        // capacity is 10 latches
        let priming = vec![0u16; 2 * 11];
        assert!(matches!(firmware().build(&priming, 2), Err(BootError::Image(_))));
    }

    #[test]
    fn test_from_default_settings() {
        let firmware = ReferenceFirmware::from_settings(&DeviceSettings::default());
        assert_eq!(firmware.config(), &DeviceConfig::default());
    }
}
