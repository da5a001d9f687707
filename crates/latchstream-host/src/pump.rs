// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Feeding a streamer from a latch producer.

use std::io;
use std::thread;
use std::time::Duration;

use latchstream_config::LatchstreamConfig;
use tracing::{debug, error};

use crate::error::{StreamError, StreamResult};
use crate::streamer::{LatchStreamer, StepOutcome};

/// Something that produces latches on demand
pub trait LatchSource {
    /// Up to `max_latches` latches as whole records of words
    ///
    /// `Ok(None)` means the input is exhausted. Latches read before a failure
    /// are returned first; the error comes from the next call.
    fn read_latches(&mut self, max_latches: usize) -> io::Result<Option<Vec<u16>>>;
}

impl<F> LatchSource for F
where
    F: FnMut(usize) -> io::Result<Option<Vec<u16>>>,
{
    fn read_latches(&mut self, max_latches: usize) -> io::Result<Option<Vec<u16>>> {
        self(max_latches)
    }
}

/// Latches already in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    words: Vec<u16>,
    record_width: usize,
    next: usize,
}

impl MemorySource {
    pub fn new(words: Vec<u16>, record_width: usize) -> Self {
        Self {
            words,
            record_width: record_width.max(1),
            next: 0,
        }
    }

    /// Latches not yet handed out
    pub fn remaining(&self) -> usize {
        (self.words.len() - self.next) / self.record_width
    }
}

impl LatchSource for MemorySource {
    fn read_latches(&mut self, max_latches: usize) -> io::Result<Option<Vec<u16>>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let take = max_latches.min(self.remaining()) * self.record_width;
        let chunk = self.words[self.next..self.next + take].to_vec();
        self.next += take;
        Ok(Some(chunk))
    }
}

/// Queue levels and pacing for [`stream_loop`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpSettings {
    /// Top the queue up when it is below this
    pub high_water: usize,
    /// Keep reading until the queue is at least this long
    pub low_water: usize,
    /// Latches asked for per read
    pub refill_latches: usize,
    /// Sleep between steps
    pub step_period: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        // 10k latches is about half a second at the fastest rates
        Self {
            high_water: 10_000,
            low_water: 1_000,
            refill_latches: 10_000,
            step_period: Duration::from_millis(10),
        }
    }
}

impl PumpSettings {
    pub fn from_config(config: &LatchstreamConfig) -> Self {
        Self {
            high_water: config.stream.queue_high_water,
            low_water: config.stream.queue_low_water,
            refill_latches: config.stream.refill_latches,
            step_period: Duration::from_millis(config.stream.step_period_ms),
        }
    }
}

/// Read once from `source`; returns true when it is exhausted
///
/// Exhaustion also tells the streamer to finish. A read error does not: the
/// input was cut short, so it is returned as [`StreamError::Source`].
pub fn refill<S>(streamer: &mut LatchStreamer, source: &mut S, latches: usize) -> StreamResult<bool>
where
    S: LatchSource + ?Sized,
{
    match source.read_latches(latches).map_err(StreamError::Source)? {
        Some(words) => {
            streamer.add_latches(&words)?;
            Ok(false)
        }
        None => {
            debug!("latch source exhausted");
            streamer.finish();
            Ok(true)
        }
    }
}

/// Fill the queue to at least `target` latches (e.g. before connecting)
///
/// Returns true if the source ran out first.
pub fn fill_queue<S>(
    streamer: &mut LatchStreamer,
    source: &mut S,
    target: usize,
    settings: &PumpSettings,
) -> StreamResult<bool>
where
    S: LatchSource + ?Sized,
{
    while streamer.latch_queue_len() < target {
        if refill(streamer, source, settings.refill_latches)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Refill between steps: one read below the high-water mark, then as many as
/// it takes to reach the low-water mark
///
/// Returns the new exhausted flag.
pub fn top_up<S>(
    streamer: &mut LatchStreamer,
    source: &mut S,
    settings: &PumpSettings,
    mut exhausted: bool,
) -> StreamResult<bool>
where
    S: LatchSource + ?Sized,
{
    if !exhausted && streamer.latch_queue_len() < settings.high_water {
        exhausted = refill(streamer, source, settings.refill_latches)?;
    }
    // not keeping up: block on the source until there is some slack
    while !exhausted && streamer.latch_queue_len() < settings.low_water {
        exhausted = refill(streamer, source, settings.refill_latches)?;
    }
    Ok(exhausted)
}

/// Step a connected streamer to completion, keeping its queue topped up
///
/// `exhausted` says whether the source already ran dry (e.g. during
/// [`fill_queue`]). A source error disconnects the streamer; queued latches
/// are kept.
pub fn stream_loop<S>(
    streamer: &mut LatchStreamer,
    source: &mut S,
    settings: &PumpSettings,
    mut exhausted: bool,
) -> StreamResult<()>
where
    S: LatchSource + ?Sized,
{
    loop {
        if streamer.step()? == StepOutcome::Finished {
            return Ok(());
        }

        exhausted = match top_up(streamer, source, settings, exhausted) {
            Ok(exhausted) => exhausted,
            Err(e) => {
                error!(error = %e, "latch source failed");
                streamer.disconnect();
                return Err(e);
            }
        };

        if !settings.step_period.is_zero() {
            thread::sleep(settings.step_period);
        }
    }
}
