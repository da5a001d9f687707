// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Latch Playback Tool

Bootstraps the playback device with the reference firmware and streams a
recorded latch file to it until the file is played out.

Usage:
  cargo run --bin latchstream-play -- --port /dev/ttyUSB0 movie.latches
  cargo run --bin latchstream-play -- --simulate movie.latches

Configuration comes from `latchstream.toml` (see `latchstream-config`),
`LATCHSTREAM_*` environment variables, then the options below.
Debug logging per crate: `--debug-latchstream-host`, `--debug-all`, or
`LATCHSTREAM_DEBUG=latchstream-host,latchstream-protocol`.
*/

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser};
use tracing::{info, warn};

use latchstream::config::{load_config_or_default, require_port, validate_config, LatchstreamConfig};
use latchstream::host::{
    fill_queue, stream_loop, LatchStreamer, ProgressReporter, PumpSettings, StreamOptions,
};
use latchstream::latch_file::{LatchFile, RECORD_WIDTH};
use latchstream::observability::{
    debug_flags_help, init_logging, parse_debug_flags, LoggingSettings,
};
use latchstream::sim::{RigSettings, SimulatedRig};
use latchstream::ReferenceFirmware;

/// Stream a recorded latch file to the playback device
#[derive(Parser, Debug)]
#[command(name = "latchstream-play", version, author, long_about = None)]
struct Args {
    /// Latch file to play (16 bytes per latch, big-endian)
    latch_file: PathBuf,

    /// Serial port of the playback device
    #[arg(short, long)]
    port: Option<String>,

    /// Configuration file (default: search for latchstream.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Latches built into the firmware image (default: the whole device buffer)
    #[arg(long)]
    priming_latches: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Play against the simulated device instead of a serial port
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

impl Args {
    fn config_overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(port) = &self.port {
            overrides.insert("port".to_string(), port.clone());
        }
        if let Some(baud) = self.baud_rate {
            overrides.insert("baud_rate".to_string(), baud.to_string());
        }
        if let Some(priming) = self.priming_latches {
            overrides.insert("priming_latches".to_string(), priming.to_string());
        }
        if let Some(level) = &self.log_level {
            overrides.insert("log_level".to_string(), level.clone());
        }
        overrides
    }
}

fn main() -> Result<()> {
    // --debug-<crate> flags are not clap options
    let (raw_args, debug_flags) = parse_debug_flags();
    let matches = Args::command()
        .after_help(debug_flags_help())
        .get_matches_from(raw_args);
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let config = load_config_or_default(args.config.as_deref(), Some(&args.config_overrides()))
        .context("Failed to load configuration")?;
    validate_config(&config)?;

    let logging = LoggingSettings::from_config(&config.logging)?;
    let _guard = init_logging(&logging, &debug_flags)?;

    if usize::from(config.device.record_width) != RECORD_WIDTH {
        bail!(
            "latch files hold {}-word records but device.record_width is {}",
            RECORD_WIDTH,
            config.device.record_width
        );
    }

    let file = File::open(&args.latch_file)
        .with_context(|| format!("Failed to open latch file {}", args.latch_file.display()))?;
    let mut source = LatchFile::new(BufReader::new(file));

    let options = StreamOptions::from_config(&config);
    let pump = PumpSettings::from_config(&config);
    let mut streamer = LatchStreamer::new(options.clone())?;
    let priming = options.effective_priming()?;
    let exhausted = fill_queue(&mut streamer, &mut source, priming, &pump)?;
    if exhausted && streamer.latch_queue_len() < priming {
        warn!(
            latches = streamer.latch_queue_len(),
            priming, "latch file is shorter than the priming block"
        );
    }

    let firmware = ReferenceFirmware::from_settings(&config.device);
    let reporter = ProgressReporter::new(Duration::from_millis(config.stream.report_period_ms));

    if args.simulate {
        play_simulated(&config, &mut streamer, &mut source, &pump, &firmware, reporter, exhausted)?;
    } else {
        play_serial(&config, &mut streamer, &mut source, &pump, &firmware, reporter, exhausted)?;
    }

    info!(latches = source.latches_read(), "playback finished");
    Ok(())
}

#[cfg(feature = "serial")]
fn play_serial(
    config: &LatchstreamConfig,
    streamer: &mut LatchStreamer,
    source: &mut LatchFile<BufReader<File>>,
    pump: &PumpSettings,
    firmware: &ReferenceFirmware,
    reporter: ProgressReporter,
    exhausted: bool,
) -> Result<()> {
    use latchstream::host::{BootloaderSettings, SerialBootloader};

    let port = require_port(config)?;
    info!(port, baud = config.link.baud_rate, "opening serial port");
    let bootloader = SerialBootloader::open(
        port,
        config.link.baud_rate,
        BootloaderSettings::from_config(config),
    )?;
    streamer.connect(bootloader, firmware, reporter)?;
    stream_loop(streamer, source, pump, exhausted)?;
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn play_serial(
    config: &LatchstreamConfig,
    _streamer: &mut LatchStreamer,
    _source: &mut LatchFile<BufReader<File>>,
    _pump: &PumpSettings,
    _firmware: &ReferenceFirmware,
    _reporter: ProgressReporter,
    _exhausted: bool,
) -> Result<()> {
    require_port(config)?;
    bail!("built without the `serial` feature; use --simulate")
}

fn play_simulated(
    config: &LatchstreamConfig,
    streamer: &mut LatchStreamer,
    source: &mut LatchFile<BufReader<File>>,
    pump: &PumpSettings,
    firmware: &ReferenceFirmware,
    reporter: ProgressReporter,
    exhausted: bool,
) -> Result<()> {
    let defaults = RigSettings::default();
    let step_us = config.stream.step_period_ms.max(1) * 1_000;
    let settings = RigSettings {
        polls_per_step: u32::try_from(step_us / defaults.poll_period_us)
            .unwrap_or(u32::MAX)
            .max(1),
        ..defaults
    };
    info!(?settings, "playing against the simulated device");

    let mut rig = SimulatedRig::new(settings);
    streamer.connect(rig.bootloader(), firmware, reporter)?;
    rig.run(streamer, source, pump, exhausted)?;
    info!(
        steps = rig.steps(),
        played = rig.played().len(),
        simulated_ms = rig.now_us() / 1_000,
        "simulation complete"
    );
    Ok(())
}
