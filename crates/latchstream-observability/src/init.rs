// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Installs the global `tracing` subscriber
//!
//! Console output always goes to stderr so it does not interleave with the
//! progress line on stdout. With the `file-logging` feature and
//! `logging.file = true`, each run also gets a JSON log in a timestamped
//! folder:
//!
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── latchstream.log
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, LoggingSettings};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps log writers alive; drop it last
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// This run's log folder, if file logging is on
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Install console (and optionally file) logging
///
/// Fails if a global subscriber is already set.
pub fn init_logging(settings: &LoggingSettings, debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&settings.level_directive());
    let env_filter = EnvFilter::try_new(&filter)
        .with_context(|| format!("Invalid log filter: {}", filter))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug_flags.any_enabled());
    let console = match settings.format {
        LogFormat::Text => console.with_filter(env_filter.clone()).boxed(),
        LogFormat::Json => console.json().with_filter(env_filter.clone()).boxed(),
    };
    layers.push(console);

    #[cfg(feature = "file-logging")]
    let (file_guards, log_dir) = if settings.file {
        let (layer, guard, run_folder) = file_layer(settings, env_filter)?;
        layers.push(layer);
        (vec![guard], Some(run_folder))
    } else {
        (Vec::new(), None)
    };

    #[cfg(not(feature = "file-logging"))]
    let log_dir = {
        if settings.file {
            eprintln!("Warning: logging.file is set but file logging is not compiled in");
        }
        drop(env_filter);
        None
    };

    Registry::default()
        .with(layers)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir,
    })
}

#[cfg(feature = "file-logging")]
fn file_layer(
    settings: &LoggingSettings,
    env_filter: EnvFilter,
) -> Result<(BoxedLayer, tracing_appender::non_blocking::WorkerGuard, PathBuf)> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let run_folder = settings.directory.join(format!("run_{}", timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

    cleanup_old_logs(&settings.directory, settings.retention_runs)?;

    let appender = tracing_appender::rolling::never(&run_folder, "latchstream.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(env_filter)
        .boxed();
    Ok((layer, guard, run_folder))
}

/// Remove all but the newest `retention_runs` run folders
#[cfg(feature = "file-logging")]
pub fn cleanup_old_logs(base_log_dir: &Path, retention_runs: usize) -> Result<()> {
    use chrono::NaiveDateTime;

    if !base_log_dir.exists() {
        return Ok(());
    }

    let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("run_"))
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y%m%d_%H%M%S").ok());
        if let Some(stamp) = stamp {
            runs.push((path, stamp));
        }
    }

    // oldest first
    runs.sort_by_key(|(_, stamp)| *stamp);
    let excess = runs.len().saturating_sub(retention_runs);
    for (path, _) in runs.iter().take(excess) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
        }
    }
    Ok(())
}
