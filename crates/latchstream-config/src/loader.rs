// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Values are layered:
//! 1. TOML file (base values, missing fields defaulted)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, LatchstreamConfig, CONFIG_FILE_NAME};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Find the configuration file
///
/// Search order:
/// 1. `LATCHSTREAM_CONFIG_PATH` environment variable
/// 2. Current working directory
/// 3. Up to five parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("LATCHSTREAM_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by LATCHSTREAM_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            let Some(parent) = current.parent() else {
                break;
            };
            search_paths.push(parent.join(CONFIG_FILE_NAME));
            current = parent;
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet LATCHSTREAM_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from a TOML file and apply overrides
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if the config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<LatchstreamConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: LatchstreamConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }
    Ok(config)
}

/// Like [`load_config`], but a missing file (when none was named) yields the
/// defaults with overrides applied
pub fn load_config_or_default(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<LatchstreamConfig> {
    match load_config(config_path, cli_args) {
        Err(ConfigError::FileNotFound(_)) if config_path.is_none() => {
            let mut config = LatchstreamConfig::default();
            apply_environment_overrides(&mut config);
            if let Some(cli) = cli_args {
                apply_cli_overrides(&mut config, cli)?;
            }
            Ok(config)
        }
        other => other,
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `LATCHSTREAM_PORT` -> `link.port`
/// - `LATCHSTREAM_BAUD_RATE` -> `link.baud_rate`
/// - `LATCHSTREAM_LOG_LEVEL` -> `logging.level`
/// - `LATCHSTREAM_LOG_FORMAT` -> `logging.format`
/// - `LATCHSTREAM_PRIMING_LATCHES` -> `stream.priming_latches`
/// - `LATCHSTREAM_MAX_BATCH` -> `stream.max_batch`
/// - `LATCHSTREAM_STATUS_INTERVAL_MS` -> `device.status_interval_ms`
///
/// Values that fail to parse are ignored.
pub fn apply_environment_overrides(config: &mut LatchstreamConfig) {
    if let Ok(value) = env::var("LATCHSTREAM_PORT") {
        config.link.port = value;
    }
    if let Some(baud) = env_parse("LATCHSTREAM_BAUD_RATE") {
        config.link.baud_rate = baud;
    }
    if let Ok(value) = env::var("LATCHSTREAM_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("LATCHSTREAM_LOG_FORMAT") {
        config.logging.format = value;
    }
    if let Some(latches) = env_parse("LATCHSTREAM_PRIMING_LATCHES") {
        config.stream.priming_latches = Some(latches);
    }
    if let Some(batch) = env_parse("LATCHSTREAM_MAX_BATCH") {
        config.stream.max_batch = batch;
    }
    if let Some(ms) = env_parse("LATCHSTREAM_STATUS_INTERVAL_MS") {
        config.device.status_interval_ms = ms;
    }
}

fn cli_parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key} = {value:?}")))
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - Map of CLI arguments (e.g., `{"port": "/dev/ttyUSB0", "max_batch": "100"}`)
///
/// # Errors
///
/// Unlike environment overrides, a CLI value that does not parse is an error.
pub fn apply_cli_overrides(
    config: &mut LatchstreamConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in cli_args {
        match key.as_str() {
            "port" => config.link.port = value.clone(),
            "baud_rate" => config.link.baud_rate = cli_parse(key, value)?,
            "log_level" => config.logging.level = value.clone(),
            "log_format" => config.logging.format = value.clone(),
            "priming_latches" => config.stream.priming_latches = Some(cli_parse(key, value)?),
            "min_batch" => config.stream.min_batch = cli_parse(key, value)?,
            "max_batch" => config.stream.max_batch = cli_parse(key, value)?,
            "stale_status_limit" => config.stream.stale_status_limit = cli_parse(key, value)?,
            "status_interval_ms" => config.device.status_interval_ms = cli_parse(key, value)?,
            "record_width" => config.device.record_width = cli_parse(key, value)?,
            "buffer_words" => config.device.buffer_words = cli_parse(key, value)?,
            _ => {}
        }
    }
    Ok(())
}
