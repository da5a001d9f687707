// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-crate debug flags
//!
//! Supports flags like `--debug-latchstream-host` and `--debug-all`.

use std::collections::BTreeSet;
use std::env;

use crate::{crate_target, KNOWN_CRATES};

/// Environment variable listing crates to debug, comma separated, or `all`
pub const DEBUG_ENV_VAR: &str = "LATCHSTREAM_DEBUG";

/// Crates with debug logging switched on
///
/// # Example
/// ```rust
/// use latchstream_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-latchstream-host".to_string()]);
/// assert!(flags.is_enabled("latchstream-host"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    pub enabled_crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Collect `--debug-{crate-name}` and `--debug-all` from arguments
    ///
    /// Anything else is ignored, so the full process arguments can be passed.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = CrateDebugFlags::default();
        for arg in args {
            if arg == "--debug-all" {
                flags.enable_all();
            } else if let Some(crate_name) = arg.strip_prefix("--debug-") {
                flags.enable(crate_name);
            }
        }
        flags
    }

    /// Add crates named in a `LATCHSTREAM_DEBUG`-style value
    pub fn merge_env_value(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        for crate_name in value.split(',').map(str::trim) {
            if !crate_name.is_empty() {
                self.enable(crate_name);
            }
        }
    }

    pub fn enable(&mut self, crate_name: &str) {
        self.enabled_crates.insert(crate_name.to_string());
    }

    pub fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enable(crate_name);
        }
    }

    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains(crate_name)
    }

    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// `DEBUG` for enabled crates, `INFO` otherwise
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Directive string for `EnvFilter`
    ///
    /// e.g. `"latchstream_host=debug,info"` with `info` as the default.
    pub fn to_filter_string(&self, default_level: &str) -> String {
        let mut filters: Vec<String> = self
            .enabled_crates
            .iter()
            .map(|name| format!("{}=debug", crate_target(name)))
            .collect();
        filters.push(default_level.to_string());
        filters.join(",")
    }
}

/// Separate `--debug-*` flags from the rest of an argument list
///
/// The remaining arguments keep their order, ready for the tool's own parser.
pub fn split_debug_args<I>(args: I) -> (Vec<String>, CrateDebugFlags)
where
    I: IntoIterator<Item = String>,
{
    let (debug, rest): (Vec<String>, Vec<String>) =
        args.into_iter().partition(|arg| arg.starts_with("--debug-"));
    (rest, CrateDebugFlags::from_args(debug))
}

/// Flags from the process arguments plus [`DEBUG_ENV_VAR`]
///
/// Returns the arguments that were not debug flags.
pub fn parse_debug_flags() -> (Vec<String>, CrateDebugFlags) {
    let (rest, mut flags) = split_debug_args(env::args());
    if let Ok(value) = env::var(DEBUG_ENV_VAR) {
        flags.merge_env_value(&value);
    }
    (rest, flags)
}

pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  {var}={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  {var}=all                             Enable debug for all crates
"#,
        KNOWN_CRATES.join(", "),
        var = DEBUG_ENV_VAR
    )
}
