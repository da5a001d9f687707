// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are within range and consistent with each other. All
//! problems are collected and reported together.

use crate::{ConfigError, ConfigResult, LatchstreamConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

fn invalid(errors: &mut Vec<ConfigValidationError>, field: &str, reason: impl Into<String>) {
    errors.push(ConfigValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    });
}

/// Validate the complete configuration
///
/// The serial port path is not checked here; only commands that open a port
/// need one (see [`require_port`]).
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &LatchstreamConfig) -> ConfigResult<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        return Ok(());
    }

    let error_messages = errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::ValidationError(format!(
        "Configuration validation failed:\n{}",
        error_messages
    )))
}

/// Fail unless a serial port is configured
pub fn require_port(config: &LatchstreamConfig) -> ConfigResult<&str> {
    if config.link.port.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            ConfigValidationError::MissingRequired {
                field: "link.port".to_string(),
            }
            .to_string(),
        ));
    }
    Ok(&config.link.port)
}

fn collect_errors(config: &LatchstreamConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_device(config, &mut errors);
    validate_stream(config, &mut errors);
    validate_link(config, &mut errors);
    validate_logging(config, &mut errors);
    errors
}

fn validate_device(config: &LatchstreamConfig, errors: &mut Vec<ConfigValidationError>) {
    let device = &config.device;
    if device.record_width == 0 {
        invalid(errors, "device.record_width", "must be at least 1");
    } else if device.capacity() < 2 {
        invalid(
            errors,
            "device.buffer_words",
            format!(
                "{} words holds fewer than two {}-word records",
                device.buffer_words, device.record_width
            ),
        );
    }
    if device.status_interval_ms == 0 {
        invalid(errors, "device.status_interval_ms", "must be non-zero");
    }
    if device.receive_timeout_ms == 0 {
        invalid(errors, "device.receive_timeout_ms", "must be non-zero");
    }
}

fn validate_stream(config: &LatchstreamConfig, errors: &mut Vec<ConfigValidationError>) {
    let stream = &config.stream;
    if stream.min_batch == 0 {
        invalid(errors, "stream.min_batch", "must be at least 1");
    }
    if stream.max_batch < stream.min_batch {
        invalid(
            errors,
            "stream.max_batch",
            format!("{} is below min_batch {}", stream.max_batch, stream.min_batch),
        );
    }
    if stream.max_batch > usize::from(u16::MAX) {
        invalid(errors, "stream.max_batch", "must fit in a 16-bit latch count");
    }
    let capacity = config.device.capacity();
    if capacity >= 2 && stream.min_batch > capacity {
        invalid(
            errors,
            "stream.min_batch",
            format!("{} exceeds the device capacity of {}", stream.min_batch, capacity),
        );
    }
    if stream.priming_latches == Some(0) {
        invalid(errors, "stream.priming_latches", "must be at least 1");
    }
    if stream.queue_low_water > stream.queue_high_water {
        invalid(
            errors,
            "stream.queue_low_water",
            "must not exceed queue_high_water",
        );
    }
    if stream.refill_latches == 0 {
        invalid(errors, "stream.refill_latches", "must be at least 1");
    }
}

fn validate_link(config: &LatchstreamConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.link.baud_rate == 0 {
        invalid(errors, "link.baud_rate", "must be non-zero");
    }
    if config.link.read_chunk == 0 {
        invalid(errors, "link.read_chunk", "must be non-zero");
    }
    if config.bootstrap.rom_info_words == 0 {
        invalid(errors, "bootstrap.rom_info_words", "must be non-zero");
    }
}

fn validate_logging(config: &LatchstreamConfig, errors: &mut Vec<ConfigValidationError>) {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if !LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
        invalid(
            errors,
            "logging.level",
            format!("'{}' is not one of {:?}", config.logging.level, LEVELS),
        );
    }
    if !matches!(config.logging.format.as_str(), "text" | "json") {
        invalid(
            errors,
            "logging.format",
            format!("'{}' is not 'text' or 'json'", config.logging.format),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&LatchstreamConfig::default()).is_ok());
    }

    #[test]
    fn test_batch_bounds() {
        let mut config = LatchstreamConfig::default();
        config.stream.min_batch = 50;
        config.stream.max_batch = 10;
        let errors = collect_errors(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("stream.max_batch"));
    }

    #[test]
    fn test_buffer_too_small_for_width() {
        let mut config = LatchstreamConfig::default();
        config.device.record_width = 5;
        config.device.buffer_words = 9;
        assert!(collect_errors(&config)
            .iter()
            .any(|e| e.to_string().contains("device.buffer_words")));
    }

    #[test]
    fn test_all_errors_reported() {
        let mut config = LatchstreamConfig::default();
        config.device.record_width = 0;
        config.device.status_interval_ms = 0;
        config.logging.format = "xml".to_string();

        let result = validate_config(&config);
        let Err(ConfigError::ValidationError(message)) = result else {
            panic!("expected a validation error");
        };
        assert!(message.contains("device.record_width"));
        assert!(message.contains("device.status_interval_ms"));
        assert!(message.contains("logging.format"));
    }

    #[test]
    fn test_require_port() {
        let mut config = LatchstreamConfig::default();
        assert!(require_port(&config).is_err());
        config.link.port = "/dev/ttyUSB0".to_string();
        assert_eq!(require_port(&config).unwrap(), "/dev/ttyUSB0");
    }
}
