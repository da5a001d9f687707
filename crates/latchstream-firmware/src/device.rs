// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Playback device main loop.
//!
//! One [`Device::poll`] call is one iteration of the firmware loop:
//! 1. Hand the console a new record if it latched
//! 2. Send a status packet if the status timer expired
//! 3. Feed received bytes through the receiver, servicing the output register
//!    after each one
//! 4. Abandon a stalled packet after the receive timeout
//! 5. Push queued status bytes out of the UART
//!
//! ## Error reporting
//!
//! Fatal errors (buffer underrun, missed latch) are stored and reported
//! immediately and stay in every later status packet. A recoverable error is
//! reported immediately only when no error is stored; a command packet with a
//! valid checksum clears a stored recoverable error.

use heapless::Deque;
use latchstream_protocol::{Command, ErrorCode, StatusPacket, PACKET_LEN};
use tracing::{debug, error, info, warn};

use crate::error::FirmwareError;
use crate::hal::{LatchInterface, SerialIO, TimeProvider};
use crate::image::FirmwareImage;
use crate::receiver::{Receiver, RxEvent};
use crate::ring::LatchRing;

/// Status packets that can wait in the transmit queue
const TX_QUEUE_PACKETS: usize = 8;
const TX_QUEUE_LEN: usize = TX_QUEUE_PACKETS * PACKET_LEN;

/// Bytes pulled from the UART per read call
const RX_CHUNK: usize = 64;

/// Build-time device parameters carried in the firmware image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Words per latch record
    pub record_width: u16,
    /// Ring buffer size in words
    pub buffer_words: u16,
    /// Period of unsolicited status packets
    pub status_interval_ms: u16,
    /// Idle time after which a partial packet is abandoned
    pub receive_timeout_ms: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            record_width: 5,
            buffer_words: 0x8000 - 0x200,
            status_interval_ms: 25,
            receive_timeout_ms: 2,
        }
    }
}

impl DeviceConfig {
    /// Ring buffer capacity in latches
    pub fn capacity(&self) -> usize {
        if self.record_width == 0 {
            return 0;
        }
        (self.buffer_words / self.record_width) as usize
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<(), FirmwareError> {
        if self.record_width == 0 {
            return Err(FirmwareError::InvalidConfig("record width is zero"));
        }
        if self.capacity() < 2 {
            return Err(FirmwareError::InvalidConfig(
                "buffer must hold at least two records",
            ));
        }
        if self.status_interval_ms == 0 {
            return Err(FirmwareError::InvalidConfig("status interval is zero"));
        }
        if self.receive_timeout_ms == 0 {
            return Err(FirmwareError::InvalidConfig("receive timeout is zero"));
        }
        Ok(())
    }
}

/// The playback device
pub struct Device<S: SerialIO, L: LatchInterface> {
    ring: LatchRing,
    stream_pos: u16,
    last_error: ErrorCode,
    receiver: Receiver,
    /// Latch count of the batch currently being received
    pending_batch: Option<u16>,
    tx: Deque<u8, TX_QUEUE_LEN>,
    status_interval_us: u64,
    receive_timeout_us: u64,
    next_status_us: u64,
    last_rx_us: u64,
    reset_requested: bool,
    serial: S,
    latch: L,
}

impl<S: SerialIO, L: LatchInterface> Device<S, L> {
    /// Start running a firmware image
    ///
    /// The first priming latch is loaded into the output register, the rest
    /// fill the ring buffer, and the stream position starts at the priming
    /// count.
    pub fn boot(
        image: &FirmwareImage,
        serial: S,
        mut latch: L,
        now_us: u64,
    ) -> Result<Self, FirmwareError> {
        let config = image.config();
        config.validate()?;
        let mut ring = LatchRing::new(config.buffer_words as usize, config.record_width as usize)?;

        let mut records = image.priming_words().chunks_exact(ring.record_width());
        let first = records.next().ok_or(FirmwareError::NoPrimingLatches)?;
        latch.load_record(first);
        for record in records {
            if !ring.push(record) {
                return Err(FirmwareError::TooManyPrimingLatches {
                    requested: image.priming_latches(),
                    capacity: ring.capacity(),
                });
            }
        }

        let receive_timeout_us = config.receive_timeout_ms as u64 * 1000;
        let stream_pos = image.priming_latches() as u16;
        info!(
            capacity = ring.capacity(),
            record_width = ring.record_width(),
            stream_pos,
            "device booted"
        );

        Ok(Self {
            ring,
            stream_pos,
            last_error: ErrorCode::None,
            receiver: Receiver::new(),
            pending_batch: None,
            tx: Deque::new(),
            status_interval_us: config.status_interval_ms as u64 * 1000,
            receive_timeout_us,
            // first status goes out quickly so the host can start streaming
            next_status_us: now_us + receive_timeout_us,
            last_rx_us: now_us,
            reset_requested: false,
            serial,
            latch,
        })
    }

    /// Committed stream position
    pub fn stream_position(&self) -> u16 {
        self.stream_pos
    }

    /// Free ring buffer slots, as reported in status packets
    pub fn free_space(&self) -> usize {
        self.ring.free()
    }

    /// Records waiting for the console
    pub fn buffered_latches(&self) -> usize {
        self.ring.len()
    }

    /// Ring buffer capacity in latches
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Error that the next status packet will carry
    pub fn last_error(&self) -> ErrorCode {
        self.last_error
    }

    /// The host sent a valid hello; the device has stopped and waits for a
    /// reset into the bootloader
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// The latch output register
    pub fn latch_interface(&self) -> &L {
        &self.latch
    }

    /// Mutable access to the latch output register
    pub fn latch_interface_mut(&mut self) -> &mut L {
        &mut self.latch
    }

    /// The serial port
    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Mutable access to the serial port
    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Run one loop iteration using a platform clock
    pub fn run_once<T: TimeProvider>(&mut self, clock: &T) {
        self.poll(clock.get_time_us());
    }

    /// Run one loop iteration at time `now_us`
    pub fn poll(&mut self, now_us: u64) {
        if self.reset_requested {
            return;
        }

        self.service_output(now_us);

        if now_us >= self.next_status_us {
            self.queue_status(now_us);
        }

        let mut buf = [0u8; RX_CHUNK];
        loop {
            match self.serial.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.last_rx_us = now_us;
                    for &byte in &buf[..n] {
                        self.handle_byte(byte, now_us);
                        self.service_output(now_us);
                        if self.reset_requested {
                            return;
                        }
                    }
                    if n < buf.len() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(?err, "uart receive error");
                    self.abandon_packet();
                    self.raise(ErrorCode::ReceiveError, now_us);
                    break;
                }
            }
        }

        if !self.receiver.is_idle()
            && now_us.saturating_sub(self.last_rx_us) >= self.receive_timeout_us
        {
            self.abandon_packet();
            self.raise(ErrorCode::ReceiveTimeout, now_us);
        }

        self.flush_tx();
    }

    /// Give the console its next record if it latched
    fn service_output(&mut self, now_us: u64) {
        if self.last_error.is_fatal() || !self.latch.latch_pending() {
            return;
        }
        let missed = match self.ring.front() {
            Some(record) => {
                self.latch.load_record(record);
                self.latch.acknowledge()
            }
            None => {
                self.raise(ErrorCode::BufferUnderrun, now_us);
                return;
            }
        };
        self.ring.advance_tail();
        if missed {
            self.raise(ErrorCode::MissedLatch, now_us);
        }
    }

    fn handle_byte(&mut self, byte: u8, now_us: u64) {
        let Some(event) = self.receiver.push_byte(byte) else {
            return;
        };
        match event {
            RxEvent::Error(code) => {
                self.pending_batch = None;
                self.raise(code, now_us);
            }
            RxEvent::Hello => {
                self.clear_recoverable_error();
                info!("hello received, resetting into bootloader");
                self.reset_requested = true;
            }
            RxEvent::Command(command) => {
                self.clear_recoverable_error();
                self.execute(command, now_us);
            }
            RxEvent::LatchWord { index, word } => self.ring.stage_word(index, word),
            RxEvent::BatchComplete { valid } => {
                let count = self.pending_batch.take().unwrap_or(0);
                if !valid {
                    self.raise(ErrorCode::BadChecksum, now_us);
                } else if self.ring.commit(count as usize) {
                    self.stream_pos = self.stream_pos.wrapping_add(count);
                } else {
                    self.raise(ErrorCode::ReceiveError, now_us);
                }
            }
        }
    }

    fn execute(&mut self, command: Command, now_us: u64) {
        match command {
            Command::RequestStatus => self.queue_status(now_us),
            Command::SendLatches {
                stream_pos,
                latch_count,
            } => {
                let words = latch_count as usize * self.ring.record_width();
                if stream_pos != self.stream_pos {
                    debug!(
                        expected = self.stream_pos,
                        got = stream_pos,
                        "rejecting batch at wrong stream position"
                    );
                    self.raise(ErrorCode::BadStreamPosition, now_us);
                    self.receiver.discard(words * 2 + 2);
                } else if latch_count as usize > self.ring.free() {
                    self.raise(ErrorCode::ReceiveError, now_us);
                    self.receiver.discard(words * 2 + 2);
                } else {
                    self.pending_batch = Some(latch_count);
                    self.receiver.expect_latch_data(words);
                }
            }
        }
    }

    fn abandon_packet(&mut self) {
        self.receiver.reset();
        self.pending_batch = None;
    }

    fn clear_recoverable_error(&mut self) {
        if !self.last_error.is_fatal() {
            self.last_error = ErrorCode::None;
        }
    }

    fn raise(&mut self, code: ErrorCode, now_us: u64) {
        if code.is_fatal() {
            error!(%code, stream_pos = self.stream_pos, "fatal device error");
        } else if self.last_error.is_error() {
            // the host already knows something went wrong
            return;
        } else {
            warn!(%code, stream_pos = self.stream_pos, "device error");
        }
        self.last_error = code;
        self.queue_status(now_us);
    }

    fn queue_status(&mut self, now_us: u64) {
        let packet = StatusPacket {
            last_error: self.last_error,
            stream_pos: self.stream_pos,
            free_space: u16::try_from(self.ring.free()).unwrap_or(u16::MAX),
        };
        self.next_status_us = now_us + self.status_interval_us;

        if self.tx.capacity() - self.tx.len() < PACKET_LEN {
            debug!("transmit queue full, status dropped");
            return;
        }
        for byte in packet.encode() {
            // space was checked above
            let _ = self.tx.push_back(byte);
        }
    }

    fn flush_tx(&mut self) {
        while !self.tx.is_empty() {
            let (front, _) = self.tx.as_slices();
            match self.serial.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    for _ in 0..n {
                        self.tx.pop_front();
                    }
                }
                Err(err) => {
                    debug!(?err, "uart transmit error");
                    break;
                }
            }
        }
    }
}
