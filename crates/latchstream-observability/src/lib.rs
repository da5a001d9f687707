// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # latchstream observability
//!
//! Structured logging setup shared by the latchstream tools.
//!
//! - `cli`: `--debug-<crate>` flags and the `LATCHSTREAM_DEBUG` variable
//! - `config`: logging settings resolved from [`latchstream_config::LoggingConfig`]
//! - `init`: installs the global `tracing` subscriber
//!
//! ```rust,ignore
//! let (args, flags) = parse_debug_flags();
//! let settings = LoggingSettings::from_config(&config.logging)?;
//! let _guard = init_logging(&settings, &flags)?;
//! ```

pub mod cli;
pub mod config;
pub mod init;

pub use cli::{debug_flags_help, parse_debug_flags, split_debug_args, CrateDebugFlags};
pub use config::{LogFormat, LoggingSettings, ObservabilityError};
pub use init::{init_logging, LoggingGuard};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crates that accept `--debug-<name>`
pub const KNOWN_CRATES: &[&str] = &[
    "latchstream",
    "latchstream-protocol",
    "latchstream-firmware",
    "latchstream-host",
    "latchstream-config",
    "latchstream-observability",
];

/// `tracing` targets use the module path, so `-` becomes `_`
pub(crate) fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
