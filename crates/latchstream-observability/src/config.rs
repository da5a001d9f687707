// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging settings resolved from the `[logging]` config section

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use latchstream_config::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObservabilityError {
    #[error("unknown log format '{0}' (expected 'text' or 'json')")]
    UnknownFormat(String),

    #[error("invalid log level '{0}'")]
    InvalidLevel(String),
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ObservabilityError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default level for targets without a debug flag
    pub level: tracing::Level,
    pub format: LogFormat,
    /// Write a log file per run (needs the `file-logging` feature)
    pub file: bool,
    pub directory: PathBuf,
    /// Run folders kept when file logging is on
    pub retention_runs: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            format: LogFormat::Text,
            file: false,
            directory: PathBuf::from("./logs"),
            retention_runs: 10,
        }
    }
}

impl LoggingSettings {
    pub fn from_config(config: &LoggingConfig) -> Result<Self, ObservabilityError> {
        let level = config
            .level
            .trim()
            .parse::<tracing::Level>()
            .map_err(|_| ObservabilityError::InvalidLevel(config.level.clone()))?;
        Ok(Self {
            level,
            format: config.format.parse()?,
            file: config.file,
            directory: config.directory.clone(),
            ..Self::default()
        })
    }

    /// Lowercase level name as `EnvFilter` expects it
    pub fn level_directive(&self) -> String {
        self.level.as_str().to_ascii_lowercase()
    }
}
