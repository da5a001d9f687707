// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the HAL traits, used by tests and the host-side
//! simulation.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;

use crate::hal::{LatchInterface, SerialIO, TimeProvider};

/// Serial port backed by two byte queues
#[derive(Debug, Default)]
pub struct MemorySerial {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    fail_next_read: bool,
}

/// The only failure a [`MemorySerial`] produces on request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedFault;

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected receive fault")
    }
}

impl MemorySerial {
    /// Create with nothing queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the device to read
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Everything the device wrote since the last call
    pub fn take_written(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }

    /// Make the next read fail as if the UART overran
    pub fn fail_next_read(&mut self) {
        self.fail_next_read = true;
    }
}

impl SerialIO for MemorySerial {
    type Error = InjectedFault;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(data);
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(InjectedFault);
        }
        let n = buffer.len().min(self.rx.len());
        for (slot, byte) in buffer.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Console side of the latch output register
///
/// Every record the device loads is kept so tests can compare the played
/// sequence against what was streamed.
#[derive(Debug, Default, Clone)]
pub struct SimulatedConsole {
    loaded: Vec<Vec<u16>>,
    pending: u32,
    latches: u64,
}

impl SimulatedConsole {
    /// Create a console that has not latched yet
    pub fn new() -> Self {
        Self::default()
    }

    /// The console latched the current record
    pub fn latch(&mut self) {
        self.pending += 1;
        self.latches += 1;
    }

    /// Every record ever loaded into the output register, in order
    pub fn loaded(&self) -> &[Vec<u16>] {
        &self.loaded
    }

    /// Record currently in the output register
    pub fn output(&self) -> Option<&[u16]> {
        self.loaded.last().map(Vec::as_slice)
    }

    /// Latch events fired so far
    pub fn latch_count(&self) -> u64 {
        self.latches
    }
}

impl LatchInterface for SimulatedConsole {
    fn latch_pending(&self) -> bool {
        self.pending > 0
    }

    fn load_record(&mut self, record: &[u16]) {
        self.loaded.push(record.to_vec());
    }

    fn acknowledge(&mut self) -> bool {
        let missed = self.pending > 1;
        self.pending = 0;
        missed
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: Cell<u64>,
}

impl ManualClock {
    /// Start at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }
}

impl TimeProvider for ManualClock {
    fn get_time_us(&self) -> u64 {
        self.now_us.get()
    }
}
