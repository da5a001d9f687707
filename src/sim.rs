// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host and device in one process
//!
//! [`SimulatedRig`] owns a [`VirtualWire`], a manual clock and (once booted)
//! a firmware [`Device`] driving a [`SimulatedConsole`]. Its
//! [`SimBootloader`] boots the device from whatever image the host
//! downloads, so a [`LatchStreamer`] runs unmodified against it:
//!
//! ```text
//! LatchStreamer ──HostPort──► VirtualWire ──DevicePort──► Device ──► SimulatedConsole
//!       ▲                                                   │
//!       └──────────────────── status ◄──────────────────────┘
//! ```
//!
//! Each rig step is one streamer step followed by a fixed slice of device
//! time. Either direction of the wire can flip bits at a deterministic rate
//! and hold bytes back for a fixed latency.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use latchstream_firmware::hal::{SerialIO, TimeProvider};
use latchstream_firmware::sim::{ManualClock, SimulatedConsole};
use latchstream_firmware::{Device, FirmwareImage};
use latchstream_host::{
    top_up, BootError, BootResult, Bootloader, LatchSource, LatchStreamer, LinkError,
    PumpSettings, SerialLink, StepOutcome, StreamError,
};
use latchstream_protocol::ErrorCode;
use thiserror::Error;
use tracing::{debug, info};

/// Version the simulated bootloader identifies as
pub const SIM_BOOTLOADER_VERSION: u16 = 3;

/// Words of target memory behind the simulated bootloader
const SIM_MEMORY_WORDS: usize = 0x1_0000;

/// The device as the rig runs it
pub type SimDevice = Device<DevicePort, SimulatedConsole>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("stream did not finish within {0} steps")]
    StepLimit(usize),
}

/// Random single-bit flips on one direction of a [`VirtualWire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Noise {
    pub seed: u64,
    /// About one byte in this many is corrupted
    pub one_in: u32,
}

#[derive(Debug)]
struct NoiseState {
    rng: u64,
    one_in: u64,
}

impl NoiseState {
    fn new(noise: Noise) -> Self {
        Self {
            // xorshift never leaves zero
            rng: noise.seed | 1,
            one_in: u64::from(noise.one_in.max(1)),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn apply(&mut self, byte: u8) -> Option<u8> {
        if self.next() % self.one_in != 0 {
            return None;
        }
        Some(byte ^ (1 << (self.next() % 8)))
    }
}

#[derive(Debug, Default)]
struct Lane {
    /// Bytes with the time they reach the far end
    bytes: VecDeque<(u64, u8)>,
    noise: Option<NoiseState>,
    latency_us: u64,
    carried: u64,
    corrupted: u64,
}

impl Lane {
    fn push(&mut self, data: &[u8], now_us: u64) {
        let due = now_us + self.latency_us;
        for &byte in data {
            let byte = match self.noise.as_mut().and_then(|n| n.apply(byte)) {
                Some(flipped) => {
                    self.corrupted += 1;
                    flipped
                }
                None => byte,
            };
            self.bytes.push_back((due, byte));
        }
        self.carried += data.len() as u64;
    }

    fn pop_into(&mut self, buf: &mut [u8], now_us: u64) -> usize {
        let arrived = self.bytes.iter().take_while(|(due, _)| *due <= now_us).count();
        let n = buf.len().min(arrived);
        for (slot, (_, byte)) in buf.iter_mut().zip(self.bytes.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

#[derive(Debug, Default)]
struct WireState {
    to_device: Lane,
    to_host: Lane,
    closed: bool,
    clock: Rc<ManualClock>,
}

impl WireState {
    fn now_us(&self) -> u64 {
        self.clock.get_time_us()
    }
}

/// Two byte queues between a host link and a device UART
///
/// Bytes can take a fixed time to cross, measured on the wire's clock.
#[derive(Debug, Clone, Default)]
pub struct VirtualWire(Rc<RefCell<WireState>>);

impl VirtualWire {
    pub fn new() -> Self {
        Self::default()
    }

    /// A wire timed by `clock`
    pub fn with_clock(clock: Rc<ManualClock>) -> Self {
        Self(Rc::new(RefCell::new(WireState {
            clock,
            ..WireState::default()
        })))
    }

    /// Delay every byte by `us` in both directions from now on
    pub fn set_latency(&self, us: u64) {
        let mut state = self.0.borrow_mut();
        state.to_device.latency_us = us;
        state.to_host.latency_us = us;
    }

    /// Corrupt either direction from now on (`None` makes it clean)
    pub fn set_noise(&self, to_device: Option<Noise>, to_host: Option<Noise>) {
        let mut state = self.0.borrow_mut();
        state.to_device.noise = to_device.map(NoiseState::new);
        state.to_host.noise = to_host.map(NoiseState::new);
    }

    pub fn host_end(&self) -> HostPort {
        HostPort(self.clone())
    }

    pub fn device_end(&self) -> DevicePort {
        DevicePort(self.clone())
    }

    /// Make the host end fail as if the port was unplugged
    pub fn close(&self) {
        self.0.borrow_mut().closed = true;
    }

    /// Bytes the host has written
    pub fn bytes_to_device(&self) -> u64 {
        self.0.borrow().to_device.carried
    }

    /// Bytes the device has written
    pub fn bytes_to_host(&self) -> u64 {
        self.0.borrow().to_host.carried
    }

    /// Bytes flipped in either direction
    pub fn corrupted_bytes(&self) -> u64 {
        let state = self.0.borrow();
        state.to_device.corrupted + state.to_host.corrupted
    }

    /// Bytes flipped on the way to the device
    pub fn corrupted_to_device(&self) -> u64 {
        self.0.borrow().to_device.corrupted
    }

    /// Drop anything in flight (a fresh firmware start)
    fn drain(&self) {
        let mut state = self.0.borrow_mut();
        state.to_device.bytes.clear();
        state.to_host.bytes.clear();
        state.closed = false;
    }
}

/// Host end of a [`VirtualWire`]
#[derive(Debug, Clone)]
pub struct HostPort(VirtualWire);

impl SerialLink for HostPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut state = self.0 .0.borrow_mut();
        if state.closed {
            return Err(LinkError::Closed);
        }
        let now = state.now_us();
        Ok(state.to_host.pop_into(buf, now))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        let mut state = self.0 .0.borrow_mut();
        if state.closed {
            return Err(LinkError::Closed);
        }
        let now = state.now_us();
        state.to_device.push(data, now);
        Ok(data.len())
    }

    fn clear_buffers(&mut self) -> Result<(), LinkError> {
        self.0 .0.borrow_mut().to_host.bytes.clear();
        Ok(())
    }
}

/// Device end of a [`VirtualWire`]
#[derive(Debug, Clone)]
pub struct DevicePort(VirtualWire);

impl SerialIO for DevicePort {
    type Error = Infallible;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        let now = state.now_us();
        state.to_host.push(data, now);
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0 .0.borrow_mut();
        let now = state.now_us();
        Ok(state.to_device.pop_into(buffer, now))
    }
}

#[derive(Default)]
struct DeviceSlot {
    device: Option<SimDevice>,
    boots: u32,
}

/// Bootloader in front of the rig's target memory
///
/// Starting execution parses the downloaded image and boots a [`SimDevice`]
/// from it.
pub struct SimBootloader {
    wire: VirtualWire,
    clock: Rc<ManualClock>,
    slot: Rc<RefCell<DeviceSlot>>,
    memory: Vec<u16>,
    connected: bool,
    needs_reset: bool,
}

impl SimBootloader {
    /// The first bounded connect times out, as with firmware still running
    pub fn require_reset(mut self) -> Self {
        self.needs_reset = true;
        self
    }

    fn check_range(&self, address: u16, length: usize) -> BootResult<std::ops::Range<usize>> {
        if !self.connected {
            return Err(BootError::NotConnected);
        }
        let start = usize::from(address);
        let end = start + length;
        if end > self.memory.len() {
            return Err(BootError::TargetRefused(format!(
                "{} words at {:#06x} run past the end of memory",
                length, address
            )));
        }
        Ok(start..end)
    }
}

impl Bootloader for SimBootloader {
    type Link = HostPort;

    fn connect(&mut self, timeout: Option<std::time::Duration>) -> BootResult<()> {
        if self.needs_reset && timeout.is_some() {
            return Err(BootError::Timeout("simulated target is not in its bootloader".to_string()));
        }
        self.needs_reset = false;
        self.connected = true;
        Ok(())
    }

    fn identify(&mut self) -> BootResult<u16> {
        if !self.connected {
            return Err(BootError::NotConnected);
        }
        Ok(SIM_BOOTLOADER_VERSION)
    }

    fn write_memory(&mut self, address: u16, words: &[u16]) -> BootResult<()> {
        let range = self.check_range(address, words.len())?;
        self.memory[range].copy_from_slice(words);
        Ok(())
    }

    fn read_memory(&mut self, address: u16, length: usize) -> BootResult<Vec<u16>> {
        let range = self.check_range(address, length)?;
        Ok(self.memory[range].to_vec())
    }

    fn start_execution(self, address: u16) -> BootResult<HostPort> {
        let range = self.check_range(address, 0)?;
        let image = FirmwareImage::from_words(&self.memory[range.start..])
            .map_err(|e| BootError::Image(e.to_string()))?;

        self.wire.drain();
        let device = Device::boot(
            &image,
            self.wire.device_end(),
            SimulatedConsole::new(),
            self.clock.get_time_us(),
        )
        .map_err(|e| BootError::Image(e.to_string()))?;
        info!(
            address,
            priming = image.priming_latches(),
            capacity = device.capacity(),
            "simulated device started"
        );

        let mut slot = self.slot.borrow_mut();
        slot.device = Some(device);
        slot.boots += 1;
        Ok(self.wire.host_end())
    }
}

/// Timing of a [`SimulatedRig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigSettings {
    /// Time between console latches; must exceed `poll_period_us`
    pub latch_period_us: u64,
    /// Device time per loop iteration
    pub poll_period_us: u64,
    /// Device loop iterations per host step
    pub polls_per_step: u32,
    /// Give up after this many host steps
    pub max_steps: Option<usize>,
}

impl Default for RigSettings {
    fn default() -> Self {
        // 60.09 Hz console, one host step per 10 ms
        Self {
            latch_period_us: 16_642,
            poll_period_us: 500,
            polls_per_step: 20,
            max_steps: None,
        }
    }
}

/// Simulated target: wire, clock, console and (once booted) device
pub struct SimulatedRig {
    settings: RigSettings,
    wire: VirtualWire,
    clock: Rc<ManualClock>,
    slot: Rc<RefCell<DeviceSlot>>,
    seen_boots: u32,
    next_latch_us: u64,
    miss_next_latch: bool,
    steps: usize,
}

impl SimulatedRig {
    pub fn new(settings: RigSettings) -> Self {
        let clock = Rc::new(ManualClock::new());
        Self {
            settings,
            wire: VirtualWire::with_clock(clock.clone()),
            clock,
            slot: Rc::default(),
            seen_boots: 0,
            next_latch_us: 0,
            miss_next_latch: false,
            steps: 0,
        }
    }

    pub fn settings(&self) -> &RigSettings {
        &self.settings
    }

    pub fn wire(&self) -> &VirtualWire {
        &self.wire
    }

    /// A bootloader for this rig's target; memory starts zeroed
    pub fn bootloader(&self) -> SimBootloader {
        SimBootloader {
            wire: self.wire.clone(),
            clock: self.clock.clone(),
            slot: self.slot.clone(),
            memory: vec![0; SIM_MEMORY_WORDS],
            connected: false,
            needs_reset: false,
        }
    }

    pub fn now_us(&self) -> u64 {
        self.clock.get_time_us()
    }

    pub fn is_booted(&self) -> bool {
        self.slot.borrow().device.is_some()
    }

    /// Host steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Fire the next console latch twice before the device can react
    pub fn miss_next_latch(&mut self) {
        self.miss_next_latch = true;
    }

    /// Run the device for one host step's worth of time
    pub fn advance(&mut self) {
        let period = self.settings.poll_period_us;
        let mut slot = self.slot.borrow_mut();
        if slot.boots != self.seen_boots {
            self.seen_boots = slot.boots;
            self.next_latch_us = self.clock.get_time_us() + self.settings.latch_period_us;
        }
        let Some(device) = slot.device.as_mut() else {
            self.clock
                .advance_us(period * u64::from(self.settings.polls_per_step));
            return;
        };

        for _ in 0..self.settings.polls_per_step {
            self.clock.advance_us(period);
            while self.clock.get_time_us() >= self.next_latch_us {
                let console = device.latch_interface_mut();
                console.latch();
                if std::mem::take(&mut self.miss_next_latch) {
                    debug!("forcing a missed latch");
                    console.latch();
                }
                self.next_latch_us += self.settings.latch_period_us;
            }
            device.run_once(self.clock.as_ref());
        }
    }

    /// One streamer step, then one slice of device time
    pub fn step(&mut self, streamer: &mut LatchStreamer) -> Result<StepOutcome, SimError> {
        if let Some(limit) = self.settings.max_steps {
            if self.steps >= limit {
                streamer.disconnect();
                return Err(SimError::StepLimit(limit));
            }
        }
        self.steps += 1;
        let outcome = streamer.step();
        self.advance();
        Ok(outcome?)
    }

    /// Step a connected streamer to completion, feeding it from `source`
    pub fn run<S>(
        &mut self,
        streamer: &mut LatchStreamer,
        source: &mut S,
        pump: &PumpSettings,
        mut exhausted: bool,
    ) -> Result<(), SimError>
    where
        S: LatchSource + ?Sized,
    {
        loop {
            if self.step(streamer)? == StepOutcome::Finished {
                return Ok(());
            }
            exhausted = match top_up(streamer, source, pump, exhausted) {
                Ok(exhausted) => exhausted,
                Err(e) => {
                    streamer.disconnect();
                    return Err(e.into());
                }
            };
        }
    }

    /// Records loaded into the output register, in order
    pub fn played(&self) -> Vec<Vec<u16>> {
        self.slot
            .borrow()
            .device
            .as_ref()
            .map(|d| d.latch_interface().loaded().to_vec())
            .unwrap_or_default()
    }

    /// [`played`](Self::played) flattened into words
    pub fn played_words(&self) -> Vec<u16> {
        self.played().concat()
    }

    pub fn device_error(&self) -> Option<ErrorCode> {
        self.slot.borrow().device.as_ref().map(Device::last_error)
    }

    pub fn device_position(&self) -> Option<u16> {
        self.slot.borrow().device.as_ref().map(Device::stream_position)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use latchstream_firmware::DeviceConfig;
    use latchstream_host::FirmwareBuilder;

    use super::*;
    use crate::reference::ReferenceFirmware;

    fn image(priming: &[u16]) -> Vec<u16> {
        ReferenceFirmware::new(DeviceConfig {
            record_width: 1,
            buffer_words: 16,
            status_interval_ms: 5,
            receive_timeout_ms: 2,
        })
        .build(priming, 1)
        .unwrap()
    }

    #[test]
    fn test_wire_carries_both_ways() {
        let wire = VirtualWire::new();
        let mut host = wire.host_end();
        let mut device = wire.device_end();
        assert_eq!(host.write(&[1, 2, 3]).unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(device.read(&mut buf), Ok(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(device.write(&[9]), Ok(1));
        assert_eq!(host.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
        assert_eq!(wire.bytes_to_device(), 3);
        assert_eq!(wire.bytes_to_host(), 1);
    }

    #[test]
    fn test_noise_is_deterministic() {
        let run = || {
            let wire = VirtualWire::new();
            wire.set_noise(Some(Noise { seed: 42, one_in: 10 }), None);
            let mut host = wire.host_end();
            host.write(&[0u8; 1000]).unwrap();
            let mut buf = vec![0u8; 1000];
            wire.device_end().read(&mut buf).unwrap();
            (buf, wire.corrupted_bytes())
        };
        let (first, corrupted) = run();
        assert_eq!(run(), (first.clone(), corrupted));
        assert!(corrupted > 0);
        // every corrupted byte has exactly one bit set
        assert_eq!(first.iter().filter(|b| **b != 0).count() as u64, corrupted);
        assert!(first.iter().all(|b| b.count_ones() <= 1));
    }

    #[test]
    fn test_latency_holds_bytes_back() {
        let clock = Rc::new(ManualClock::new());
        let wire = VirtualWire::with_clock(clock.clone());
        wire.set_latency(1_000);
        let mut host = wire.host_end();
        let mut device = wire.device_end();
        let mut buf = [0u8; 8];

        host.write(&[1, 2]).unwrap();
        clock.advance_us(400);
        host.write(&[3]).unwrap();
        assert_eq!(device.read(&mut buf), Ok(0));

        clock.advance_us(600);
        assert_eq!(device.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(device.read(&mut buf), Ok(0));

        clock.advance_us(400);
        assert_eq!(device.read(&mut buf), Ok(1));
        assert_eq!(buf[0], 3);

        device.write(&[9]).unwrap();
        assert_eq!(host.read(&mut buf).unwrap(), 0);
        clock.advance_us(1_000);
        assert_eq!(host.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn test_closed_wire() {
        let wire = VirtualWire::new();
        let mut host = wire.host_end();
        wire.close();
        assert!(matches!(host.write(&[1]), Err(LinkError::Closed)));
    }

    #[test]
    fn test_bootloader_boots_image() {
        let rig = SimulatedRig::new(RigSettings::default());
        let mut bootloader = rig.bootloader();
        assert!(matches!(bootloader.identify(), Err(BootError::NotConnected)));
        bootloader.connect(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(bootloader.identify().unwrap(), SIM_BOOTLOADER_VERSION);

        let words = image(&[7, 8, 9]);
        bootloader.write_memory(0x100, &words).unwrap();
        assert_eq!(bootloader.read_memory(0x100, words.len()).unwrap(), words);
        assert!(!rig.is_booted());

        bootloader.start_execution(0x100).unwrap();
        assert!(rig.is_booted());
        assert_eq!(rig.device_position(), Some(3));
        assert_eq!(rig.played(), vec![vec![7]]);
    }

    #[test]
    fn test_bootloader_rejects_bad_image_and_range() {
        let rig = SimulatedRig::new(RigSettings::default());
        let mut bootloader = rig.bootloader();
        bootloader.connect(None).unwrap();
        assert!(matches!(
            bootloader.write_memory(0xFFFF, &[1, 2]),
            Err(BootError::TargetRefused(_))
        ));
        assert!(matches!(bootloader.start_execution(0), Err(BootError::Image(_))));
        assert!(!rig.is_booted());
    }

    #[test]
    fn test_require_reset_times_out_once() {
        let rig = SimulatedRig::new(RigSettings::default());
        let mut bootloader = rig.bootloader().require_reset();
        assert!(matches!(
            bootloader.connect(Some(Duration::from_millis(10))),
            Err(BootError::Timeout(_))
        ));
        bootloader.connect(None).unwrap();
        bootloader.connect(Some(Duration::from_millis(10))).unwrap();
    }

    #[test]
    fn test_console_latches_on_schedule() {
        let mut rig = SimulatedRig::new(RigSettings {
            latch_period_us: 1_000,
            poll_period_us: 100,
            polls_per_step: 10,
            max_steps: None,
        });
        let mut bootloader = rig.bootloader();
        bootloader.connect(None).unwrap();
        bootloader.write_memory(0, &image(&[0, 1, 2, 3, 4])).unwrap();
        bootloader.start_execution(0).unwrap();

        // 3 ms: three latches out of five primed records
        for _ in 0..3 {
            rig.advance();
        }
        assert_eq!(rig.played_words(), vec![0, 1, 2, 3]);
        assert_eq!(rig.device_error(), Some(ErrorCode::None));

        // runs dry after the fourth record
        for _ in 0..3 {
            rig.advance();
        }
        assert_eq!(rig.played_words(), vec![0, 1, 2, 3, 4]);
        assert_eq!(rig.device_error(), Some(ErrorCode::BufferUnderrun));
    }

    #[test]
    fn test_forced_missed_latch() {
        let mut rig = SimulatedRig::new(RigSettings {
            latch_period_us: 1_000,
            poll_period_us: 100,
            polls_per_step: 10,
            max_steps: None,
        });
        let mut bootloader = rig.bootloader();
        bootloader.connect(None).unwrap();
        bootloader.write_memory(0, &image(&[0, 1, 2, 3, 4])).unwrap();
        bootloader.start_execution(0).unwrap();

        rig.miss_next_latch();
        rig.advance();
        assert_eq!(rig.device_error(), Some(ErrorCode::MissedLatch));
    }
}
