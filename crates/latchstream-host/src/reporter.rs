// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::events::{StatusReport, StreamEvent, StreamObserver};

/// Statuses kept for context when the device reports an error
const HISTORY: usize = 5;

/// Nominal console latch rate the "x" speed factor is relative to
pub const NOMINAL_LATCH_HZ: f64 = 60.09;

/// Terminal progress line for a stream
///
/// Status notifications are folded into one line rewritten in place at most
/// once per period. Other notifications are printed on their own line; device
/// errors are preceded by the last few statuses.
pub struct ProgressReporter<W: Write = io::Stdout> {
    out: W,
    period: Duration,
    history: VecDeque<StatusReport>,
    status_line_open: bool,
    last_print: Instant,
    latches_sent: usize,
    last_pos: u64,
    overall_pos: u64,
}

impl ProgressReporter<io::Stdout> {
    pub fn new(period: Duration) -> Self {
        Self::with_writer(io::stdout(), period)
    }
}

impl<W: Write> ProgressReporter<W> {
    pub fn with_writer(out: W, period: Duration) -> Self {
        Self {
            out,
            period,
            history: VecDeque::with_capacity(HISTORY),
            status_line_open: false,
            last_print: Instant::now(),
            latches_sent: 0,
            last_pos: 0,
            overall_pos: 0,
        }
    }

    /// Latches the device has counted since the reporter was created
    pub fn overall_position(&self) -> u64 {
        self.overall_pos
    }

    fn close_status_line(&mut self) {
        if self.status_line_open {
            let _ = writeln!(self.out);
            self.status_line_open = false;
        }
    }

    fn print_line(&mut self, line: &dyn std::fmt::Display) {
        self.close_status_line();
        let _ = writeln!(self.out, "{line}");
    }

    fn on_status(&mut self, report: &StatusReport) {
        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(*report);
        self.latches_sent += report.sent;

        // widen the 16-bit device position using the previous one
        let mut current = u64::from(report.device_pos) + (self.last_pos & !0xFFFF);
        if current < self.last_pos {
            current += 0x1_0000;
        }
        self.overall_pos += current - self.last_pos;
        self.last_pos = current;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_print);
        if elapsed < self.period {
            return;
        }

        let buffer_use = report.buffer_use();
        let percent = if report.buffer_size == 0 {
            0
        } else {
            100 * buffer_use / report.buffer_size
        };
        let speed = self.latches_sent as f64 / NOMINAL_LATCH_HZ / elapsed.as_secs_f64().max(1e-6);
        let latched = self.overall_pos as i64 - buffer_use as i64;
        let _ = write!(
            self.out,
            "  Sent:{:>5} ({:>5.1}x)   Buf:{:>5} ({:>3}%)   Latched: {}\r",
            self.latches_sent, speed, buffer_use, percent, latched
        );
        let _ = self.out.flush();

        self.status_line_open = true;
        self.latches_sent = 0;
        self.last_print = now;
    }
}

impl<W: Write> StreamObserver for ProgressReporter<W> {
    fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Status(report) => self.on_status(report),
            StreamEvent::DeviceError { .. } => {
                self.close_status_line();
                let history: Vec<StatusReport> = self.history.iter().copied().collect();
                for report in &history {
                    let _ = writeln!(self.out, "  {report}");
                }
                let _ = writeln!(self.out, "{event}");
            }
            other => self.print_line(other),
        }
    }
}
