// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host-side flow control
//!
//! The streamer never sends more latches than the device has said it has room
//! for, minus whatever is already on the way. Every batch it sends stays in a
//! resend window until it is old enough that the device must have stored it;
//! when the device reports a recoverable error at some stream position, the
//! streamer pulls the batches past that position back into the queue and
//! carries on from there.

use std::collections::VecDeque;

use latchstream_protocol::{
    encode_latch_data, encode_send_latches, Command, ErrorCode, ProtocolError, ScanEvent,
    StatusPacket, StatusScanner,
};
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::{run_bootstrap, Bootloader, FirmwareBuilder};
use crate::error::{LinkError, StreamError, StreamResult};
use crate::events::{ConnectionState, StatusReport, StreamEvent, StreamObserver};
use crate::link::SerialLink;
use crate::options::StreamOptions;
use crate::queue::LatchQueue;
use crate::resend::ResendWindow;

/// Latches sent but not yet counted by the device
///
/// Positions wrap at 2^16, so this is the modular difference.
pub fn latches_in_transit(host_pos: u16, device_pos: u16) -> usize {
    usize::from(host_pos.wrapping_sub(device_pos))
}

/// Result of one [`LatchStreamer::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep calling `step`
    Streaming,
    /// The device played everything out; the streamer is disconnected
    Finished,
}

/// Everything that only exists while connected
struct Session {
    link: Box<dyn SerialLink>,
    observer: Box<dyn StreamObserver>,
    scanner: StatusScanner,
    out_chunks: VecDeque<Vec<u8>>,
    out_pos: usize,
    resend: ResendWindow,
    host_pos: u16,
    read_buf: Vec<u8>,
    /// Position of the last rewind, until an error-free status arrives
    rewound_to: Option<u16>,
    /// Error statuses at `rewound_to` ignored since that rewind
    stale_ignored: usize,
}

impl Session {
    fn emit(&mut self, event: StreamEvent) {
        self.observer.on_event(&event);
    }

    /// Write queued chunks until the link stops taking bytes
    fn flush_output(&mut self) -> Result<(), LinkError> {
        while let Some(chunk) = self.out_chunks.front() {
            let written = self.link.write(&chunk[self.out_pos..])?;
            self.out_pos += written;
            if self.out_pos < chunk.len() {
                break;
            }
            self.out_chunks.pop_front();
            self.out_pos = 0;
        }
        Ok(())
    }

    fn pending_output(&self) -> usize {
        self.out_chunks.iter().map(Vec::len).sum::<usize>() - self.out_pos
    }
}

/// Streams latches to the playback device
///
/// Latches are queued with [`add_latches`](Self::add_latches) (before and
/// during streaming), [`connect`](Self::connect) bootstraps the device with
/// the first of them, and [`step`](Self::step) is then called repeatedly until
/// it reports [`StepOutcome::Finished`] or an error.
pub struct LatchStreamer {
    options: StreamOptions,
    queue: LatchQueue,
    state: ConnectionState,
    finish_requested: bool,
    session: Option<Session>,
}

impl LatchStreamer {
    pub fn new(options: StreamOptions) -> StreamResult<Self> {
        options.validate()?;
        Ok(Self {
            queue: LatchQueue::new(options.record_width),
            options,
            state: ConnectionState::Disconnected,
            finish_requested: false,
            session: None,
        })
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Position the next batch will be sent at, while connected
    pub fn stream_position(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.host_pos)
    }

    /// Latches held for possible retransmission
    pub fn resend_window_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.resend.len())
    }

    /// Bytes framed but not yet accepted by the link
    pub fn pending_output(&self) -> usize {
        self.session.as_ref().map_or(0, Session::pending_output)
    }

    /// Queue latches, given as whole records of words; returns the queue length
    pub fn add_latches(&mut self, words: &[u16]) -> StreamResult<usize> {
        let width = self.options.record_width;
        if words.len() % width != 0 {
            return Err(StreamError::InvalidLatches {
                words: words.len(),
                record_width: width,
            });
        }
        self.queue.push_back(words.to_vec());
        Ok(self.queue.len())
    }

    pub fn latch_queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop everything queued (latches already framed are still sent)
    pub fn clear_latch_queue(&mut self) {
        self.queue.clear();
    }

    /// Bootstrap the device and start a session
    ///
    /// The priming latches are taken from the front of the queue; if the
    /// bootstrap fails they are put back.
    pub fn connect<B, F, O>(&mut self, bootloader: B, firmware: &F, observer: O) -> StreamResult<()>
    where
        B: Bootloader,
        F: FirmwareBuilder + ?Sized,
        O: StreamObserver + 'static,
    {
        if self.session.is_some() {
            return Err(StreamError::AlreadyConnected);
        }
        let priming = self.options.effective_priming()?;
        if self.queue.len() < priming {
            return Err(StreamError::NotEnoughPriming {
                requested: priming,
                available: self.queue.len(),
            });
        }

        let mut observer: Box<dyn StreamObserver> = Box::new(observer);
        let priming_words = self.queue.take(priming, priming);
        let link = match run_bootstrap(
            bootloader,
            firmware,
            &priming_words,
            self.options.record_width,
            self.options.load_address,
            self.options.connect_timeout,
            observer.as_mut(),
        ) {
            Ok(link) => link,
            Err(e) => {
                self.queue.push_front(priming_words);
                return Err(e.into());
            }
        };

        let mut session = Session {
            link: Box::new(link),
            observer,
            scanner: StatusScanner::new(),
            out_chunks: VecDeque::new(),
            out_pos: 0,
            resend: ResendWindow::new(self.options.record_width),
            host_pos: (priming & 0xFFFF) as u16,
            read_buf: vec![0; self.options.read_chunk],
            rewound_to: None,
            stale_ignored: 0,
        };
        // don't wait for the periodic status to learn the buffer state
        session
            .out_chunks
            .push_back(Command::RequestStatus.encode().to_vec());
        info!(priming, "connected");
        self.set_state(&mut session, ConnectionState::Initializing);
        self.session = Some(session);
        Ok(())
    }

    /// Ask the device for an immediate status packet
    pub fn request_status(&mut self) -> StreamResult<()> {
        let session = self.session.as_mut().ok_or(StreamError::NotConnected)?;
        session
            .out_chunks
            .push_back(Command::RequestStatus.encode().to_vec());
        Ok(())
    }

    /// The producer has no more latches
    ///
    /// Streaming carries on until the queue is empty and the device has
    /// played everything out. May be called before the first status arrives.
    pub fn finish(&mut self) {
        self.finish_requested = true;
        if self.state == ConnectionState::Transferring {
            if let Some(mut session) = self.session.take() {
                self.set_state(&mut session, ConnectionState::EmptyingHost);
                self.session = Some(session);
            }
        }
    }

    /// One cooperative iteration: read, react to the newest status, write
    ///
    /// Any error ends the session.
    pub fn step(&mut self) -> StreamResult<StepOutcome> {
        let mut session = self.session.take().ok_or(StreamError::NotConnected)?;
        match self.step_session(&mut session) {
            Ok(StepOutcome::Streaming) => {
                self.session = Some(session);
                Ok(StepOutcome::Streaming)
            }
            Ok(StepOutcome::Finished) => {
                info!("playback complete");
                self.teardown(session, Some(true));
                Ok(StepOutcome::Finished)
            }
            Err(e) => {
                error!(error = %e, "streaming stopped");
                self.teardown(session, Some(false));
                Err(e)
            }
        }
    }

    /// Close the link and drop session buffers; queued latches are kept
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!("disconnecting");
            self.teardown(session, None);
        }
    }

    fn teardown(&mut self, mut session: Session, success: Option<bool>) {
        self.set_state(&mut session, ConnectionState::Disconnected);
        if let Some(success) = success {
            session.emit(StreamEvent::Finished { success });
        }
        self.finish_requested = false;
    }

    fn set_state(&mut self, session: &mut Session, to: ConnectionState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!(%from, %to, "stream state changed");
        session.emit(StreamEvent::StateChanged { from, to });
    }

    fn step_session(&mut self, session: &mut Session) -> StreamResult<StepOutcome> {
        let received = session.link.read(&mut session.read_buf)?;
        let mut latest = None;
        if received > 0 {
            session.scanner.push(&session.read_buf[..received]);
            while let Some(event) = session.scanner.next_event() {
                match event {
                    ScanEvent::Status(status) => latest = Some(status),
                    ScanEvent::Rejected(ProtocolError::Framing { discarded }) => {
                        trace!(discarded, "skipped bytes between packets");
                    }
                    ScanEvent::Rejected(err) => {
                        warn!(%err, "discarding invalid packet");
                        session.emit(StreamEvent::InvalidPacket {
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        // older statuses are superseded by the newest one
        if let Some(status) = latest {
            if self.handle_status(session, status)? == StepOutcome::Finished {
                return Ok(StepOutcome::Finished);
            }
        }

        session.flush_output()?;
        Ok(StepOutcome::Streaming)
    }

    fn handle_status(
        &mut self,
        session: &mut Session,
        status: StatusPacket,
    ) -> StreamResult<StepOutcome> {
        let device_pos = status.stream_pos;
        if self.state == ConnectionState::Initializing {
            let next = if self.finish_requested {
                ConnectionState::EmptyingHost
            } else {
                ConnectionState::Transferring
            };
            self.set_state(session, next);
        }

        let code = status.last_error;
        if code.is_error() {
            session.emit(StreamEvent::DeviceError { code, device_pos });
            if code.is_fatal() {
                if self.state == ConnectionState::EmptyingDevice
                    && code == ErrorCode::BufferUnderrun
                {
                    return Ok(StepOutcome::Finished);
                }
                return Err(StreamError::DeviceFault { code, device_pos });
            }
            if self.is_stale_error(session, device_pos) {
                session.stale_ignored += 1;
                debug!(
                    %code,
                    device_pos,
                    ignored = session.stale_ignored,
                    "error predates the resend, not rewinding again"
                );
            } else {
                warn!(%code, device_pos, host_pos = session.host_pos, "device reported an error");
                self.rewind(session, device_pos)?;
            }
        } else {
            session.rewound_to = None;
        }

        let in_transit = latches_in_transit(session.host_pos, device_pos);
        let buffer_space = usize::from(status.free_space);
        let usable = buffer_space as isize - in_transit as isize;
        let host_pos = session.host_pos;
        let sent = self.send_batches(session, usable)?;

        let report = StatusReport {
            device_pos,
            host_pos,
            buffer_space,
            in_transit,
            usable,
            sent,
            buffer_size: self.options.device_capacity,
        };
        debug!(%report, sent, "status");
        session.emit(StreamEvent::Status(report));

        if self.state == ConnectionState::EmptyingHost
            && self.queue.is_empty()
            && latches_in_transit(session.host_pos, device_pos) == 0
        {
            self.set_state(session, ConnectionState::EmptyingDevice);
        }
        Ok(StepOutcome::Streaming)
    }

    /// An error at the position already rewound to, with the resend still out
    ///
    /// The device keeps reporting the error until the resent latches reach
    /// it. Only `stale_status_limit` such statuses are let through, in case
    /// the resend was lost as well.
    fn is_stale_error(&self, session: &Session, device_pos: u16) -> bool {
        session.rewound_to == Some(device_pos)
            && session.host_pos != device_pos
            && session.stale_ignored < self.options.stale_status_limit
    }

    /// Put everything past `device_pos` back in the queue
    fn rewind(&mut self, session: &mut Session, device_pos: u16) -> StreamResult<()> {
        let latches = latches_in_transit(session.host_pos, device_pos);
        if latches > 0 {
            let words = session.resend.reclaim(latches)?;
            self.queue.push_front(words);
            session.emit(StreamEvent::Rewound {
                from: session.host_pos,
                to: device_pos,
                latches,
            });
            if self.state == ConnectionState::EmptyingDevice {
                self.set_state(session, ConnectionState::EmptyingHost);
            }
        }
        session.host_pos = device_pos;
        session.rewound_to = Some(device_pos);
        session.stale_ignored = 0;
        Ok(())
    }

    /// Frame as many batches as fit in `usable`; returns latches sent
    fn send_batches(&mut self, session: &mut Session, mut usable: isize) -> StreamResult<usize> {
        let width = self.options.record_width;
        let min_batch = self.options.min_batch as isize;
        let max_batch = self.options.max_batch as isize;
        let mut sent = 0;

        while usable >= min_batch {
            let words = self.queue.take(
                min_batch.min(usable) as usize,
                max_batch.min(usable) as usize,
            );
            if words.is_empty() {
                break;
            }
            let latches = words.len() / width;
            let data = encode_latch_data(&words);
            let frame = encode_send_latches(session.host_pos, width, &data)?;
            trace!(stream_pos = session.host_pos, latches, "sending batch");
            session.out_chunks.push_back(frame);

            // the device can never be missing more than it can hold
            session.resend.push(data);
            session.resend.prune(self.options.device_capacity);

            session.host_pos = session.host_pos.wrapping_add(latches as u16);
            usable -= latches as isize;
            sent += latches;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use latchstream_protocol::{decode_command, crc16_kermit, PACKET_LEN};

    use super::*;
    use crate::bootstrap::mock::{passthrough_firmware, MockBootloader, MockLink, Wire};

    type Events = Rc<RefCell<Vec<StreamEvent>>>;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Latches { pos: u16, words: Vec<u16>, bytes: Vec<u8> },
        RequestStatus,
    }

    fn options(capacity: usize, priming: usize, min: usize, max: usize) -> StreamOptions {
        StreamOptions {
            record_width: 1,
            device_capacity: capacity,
            priming_latches: Some(priming),
            min_batch: min,
            max_batch: max,
            ..StreamOptions::default()
        }
    }

    fn connected(options: StreamOptions, latches: std::ops::Range<u16>) -> (LatchStreamer, Rc<RefCell<Wire>>, Events) {
        let mut streamer = LatchStreamer::new(options).unwrap();
        streamer.add_latches(&latches.collect::<Vec<u16>>()).unwrap();
        let wire = Rc::new(RefCell::new(Wire::default()));
        let bootloader = MockBootloader {
            link: MockLink(wire.clone()),
            ..MockBootloader::default()
        };
        let events: Events = Rc::default();
        let sink = events.clone();
        streamer
            .connect(bootloader, &passthrough_firmware, move |e: &StreamEvent| {
                sink.borrow_mut().push(e.clone())
            })
            .unwrap();
        (streamer, wire, events)
    }

    fn status(wire: &Rc<RefCell<Wire>>, code: ErrorCode, pos: u16, free: u16) {
        let packet = StatusPacket {
            last_error: code,
            stream_pos: pos,
            free_space: free,
        };
        wire.borrow_mut().to_host.extend(packet.encode());
    }

    /// Split everything the host wrote into commands
    fn sent(wire: &Rc<RefCell<Wire>>) -> Vec<Sent> {
        let bytes = std::mem::take(&mut wire.borrow_mut().from_host);
        let mut out = Vec::new();
        let mut at = 0;
        while at < bytes.len() {
            match decode_command(&bytes[at..at + PACKET_LEN]).unwrap() {
                Command::RequestStatus => {
                    out.push(Sent::RequestStatus);
                    at += PACKET_LEN;
                }
                Command::SendLatches {
                    stream_pos,
                    latch_count,
                } => {
                    let data_len = usize::from(latch_count) * 2;
                    let end = at + PACKET_LEN + data_len + 2;
                    let data = &bytes[at + PACKET_LEN..end];
                    assert_eq!(crc16_kermit(data), 0);
                    out.push(Sent::Latches {
                        pos: stream_pos,
                        words: latchstream_protocol::words_from_le_bytes(&data[..data_len]),
                        bytes: bytes[at..end].to_vec(),
                    });
                    at = end;
                }
            }
        }
        out
    }

    fn batch_positions(sent: &[Sent]) -> Vec<u16> {
        sent.iter()
            .filter_map(|s| match s {
                Sent::Latches { pos, .. } => Some(*pos),
                Sent::RequestStatus => None,
            })
            .collect()
    }

    #[test]
    fn test_in_transit_wraps() {
        assert_eq!(latches_in_transit(3, 65534), 5);
        assert_eq!(latches_in_transit(40, 40), 0);
        assert_eq!(latches_in_transit(100, 40), 60);
    }

    #[test]
    fn test_add_latches_checks_width() {
        let mut streamer = LatchStreamer::new(StreamOptions::default()).unwrap();
        assert_eq!(streamer.add_latches(&[0; 10]).unwrap(), 2);
        assert_eq!(streamer.add_latches(&[]).unwrap(), 2);
        assert!(matches!(
            streamer.add_latches(&[0; 7]),
            Err(StreamError::InvalidLatches {
                words: 7,
                record_width: 5
            })
        ));
        assert_eq!(streamer.latch_queue_len(), 2);
    }

    #[test]
    fn test_connect_needs_priming_latches() {
        let mut streamer = LatchStreamer::new(options(100, 10, 20, 200)).unwrap();
        streamer.add_latches(&[1, 2, 3]).unwrap();
        let result = streamer.connect(
            MockBootloader::default(),
            &passthrough_firmware,
            |_: &StreamEvent| {},
        );
        assert!(matches!(
            result,
            Err(StreamError::NotEnoughPriming {
                requested: 10,
                available: 3
            })
        ));
        assert_eq!(streamer.latch_queue_len(), 3);
        assert_eq!(streamer.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_bootstrap_restores_priming() {
        let mut streamer = LatchStreamer::new(options(100, 10, 20, 200)).unwrap();
        streamer.add_latches(&(0..30).collect::<Vec<u16>>()).unwrap();
        let bootloader = MockBootloader {
            corrupt_read_back: true,
            ..MockBootloader::default()
        };
        assert!(streamer
            .connect(bootloader, &passthrough_firmware, |_: &StreamEvent| {})
            .is_err());
        assert_eq!(streamer.latch_queue_len(), 30);
        assert!(!streamer.is_connected());
    }

    #[test]
    fn test_connect_requests_status() {
        let (mut streamer, wire, events) = connected(options(100, 10, 20, 200), 0..250);
        assert_eq!(streamer.state(), ConnectionState::Initializing);
        assert_eq!(streamer.stream_position(), Some(10));
        assert_eq!(streamer.latch_queue_len(), 240);
        assert!(matches!(
            streamer.connect(MockBootloader::default(), &passthrough_firmware, |_: &StreamEvent| {}),
            Err(StreamError::AlreadyConnected)
        ));

        assert_eq!(streamer.step().unwrap(), StepOutcome::Streaming);
        assert_eq!(sent(&wire), vec![Sent::RequestStatus]);
        assert!(events.borrow().contains(&StreamEvent::StateChanged {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Initializing,
        }));
    }

    #[test]
    fn test_first_status_starts_transfer() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        streamer.step().unwrap();
        sent(&wire);

        // one record in the output register, nine in the ring
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::Transferring);

        let batches = sent(&wire);
        assert_eq!(batch_positions(&batches), vec![10]);
        let Sent::Latches { words, .. } = &batches[0] else {
            panic!("expected latches");
        };
        assert_eq!(words, &(10..100).collect::<Vec<u16>>());
        assert_eq!(streamer.stream_position(), Some(100));
    }

    #[test]
    fn test_in_transit_latches_are_not_resent() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        sent(&wire);

        // device hasn't seen the batch yet: nothing is usable
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert!(batch_positions(&sent(&wire)).is_empty());

        // device stored 90 and played 30
        status(&wire, ErrorCode::None, 100, 30);
        streamer.step().unwrap();
        assert_eq!(batch_positions(&sent(&wire)), vec![100]);
        assert_eq!(streamer.stream_position(), Some(130));
    }

    #[test]
    fn test_small_space_is_not_used() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        status(&wire, ErrorCode::None, 10, 19);
        streamer.step().unwrap();
        assert!(batch_positions(&sent(&wire)).is_empty());
        assert_eq!(streamer.stream_position(), Some(10));
    }

    #[test]
    fn test_induced_loss_resends_identical_bytes() {
        let (mut streamer, wire, events) = connected(options(100, 10, 10, 10), 0..250);
        status(&wire, ErrorCode::None, 10, 50);
        streamer.step().unwrap();
        let first = sent(&wire);
        assert_eq!(batch_positions(&first), vec![10, 20, 30, 40, 50]);
        assert_eq!(streamer.stream_position(), Some(60));

        status(&wire, ErrorCode::BadStreamPosition, 40, 20);
        streamer.step().unwrap();
        let second = sent(&wire);
        assert_eq!(batch_positions(&second), vec![40, 50]);
        // first[0] is the connect-time status request
        assert_eq!(second[0], first[4]);
        assert_eq!(second[1], first[5]);
        assert_eq!(streamer.stream_position(), Some(60));
        assert!(events.borrow().contains(&StreamEvent::Rewound {
            from: 60,
            to: 40,
            latches: 20,
        }));

        // and on from 60 once there is room
        status(&wire, ErrorCode::None, 60, 30);
        streamer.step().unwrap();
        let third = sent(&wire);
        assert_eq!(batch_positions(&third), vec![60, 70, 80]);
        let Sent::Latches { words, .. } = &third[0] else {
            panic!("expected latches");
        };
        assert_eq!(words, &(60..70).collect::<Vec<u16>>());
    }

    fn rewinds(events: &Events) -> usize {
        events
            .borrow()
            .iter()
            .filter(|e| matches!(e, StreamEvent::Rewound { .. }))
            .count()
    }

    #[test]
    fn test_repeated_error_is_not_rewound_twice() {
        let (mut streamer, wire, events) = connected(options(100, 10, 10, 10), 0..250);
        status(&wire, ErrorCode::None, 10, 50);
        streamer.step().unwrap();
        sent(&wire);

        status(&wire, ErrorCode::BadStreamPosition, 40, 20);
        streamer.step().unwrap();
        assert_eq!(batch_positions(&sent(&wire)), vec![40, 50]);

        // sent before the resend got there
        status(&wire, ErrorCode::BadStreamPosition, 40, 20);
        streamer.step().unwrap();
        status(&wire, ErrorCode::BadStreamPosition, 40, 18);
        streamer.step().unwrap();
        assert!(sent(&wire).is_empty());
        assert_eq!(rewinds(&events), 1);
        assert_eq!(streamer.stream_position(), Some(60));

        status(&wire, ErrorCode::None, 60, 30);
        streamer.step().unwrap();
        assert_eq!(batch_positions(&sent(&wire)), vec![60, 70, 80]);

        // a later error at the same position is new
        status(&wire, ErrorCode::BadChecksum, 60, 0);
        streamer.step().unwrap();
        assert_eq!(rewinds(&events), 2);
        assert_eq!(streamer.stream_position(), Some(60));
    }

    #[test]
    fn test_lost_resend_is_rewound_after_limit() {
        let (mut streamer, wire, events) = connected(
            StreamOptions {
                stale_status_limit: 2,
                ..options(100, 10, 10, 10)
            },
            0..250,
        );
        status(&wire, ErrorCode::None, 10, 50);
        streamer.step().unwrap();
        sent(&wire);

        status(&wire, ErrorCode::BadStreamPosition, 40, 20);
        streamer.step().unwrap();
        let resend = sent(&wire);

        for _ in 0..2 {
            status(&wire, ErrorCode::BadStreamPosition, 40, 20);
            streamer.step().unwrap();
        }
        assert!(sent(&wire).is_empty());
        assert_eq!(rewinds(&events), 1);

        status(&wire, ErrorCode::BadStreamPosition, 40, 20);
        streamer.step().unwrap();
        assert_eq!(rewinds(&events), 2);
        assert_eq!(sent(&wire), resend);
    }

    #[test]
    fn test_rewind_splits_batches() {
        let (mut streamer, wire, _) = connected(options(100, 10, 10, 10), 0..250);
        status(&wire, ErrorCode::None, 10, 30);
        streamer.step().unwrap();
        sent(&wire);

        // device got half of the batch at 30; the rest comes back
        status(&wire, ErrorCode::ReceiveTimeout, 35, 25);
        streamer.step().unwrap();
        let Sent::Latches { pos, words, .. } = &sent(&wire)[0] else {
            panic!("expected latches");
        };
        assert_eq!(*pos, 35);
        assert_eq!(words, &(35..45).collect::<Vec<u16>>());
    }

    #[test]
    fn test_fatal_error_stops_everything() {
        let (mut streamer, wire, events) = connected(options(100, 10, 20, 200), 0..250);
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        sent(&wire);
        let writes_before = wire.borrow().writes;

        status(&wire, ErrorCode::MissedLatch, 50, 40);
        let result = streamer.step();
        assert!(matches!(
            result,
            Err(StreamError::DeviceFault {
                code: ErrorCode::MissedLatch,
                device_pos: 50
            })
        ));
        assert_eq!(streamer.state(), ConnectionState::Disconnected);
        assert_eq!(wire.borrow().writes, writes_before);
        assert!(events
            .borrow()
            .contains(&StreamEvent::Finished { success: false }));

        status(&wire, ErrorCode::None, 50, 40);
        assert!(matches!(streamer.step(), Err(StreamError::NotConnected)));
        assert!(sent(&wire).is_empty());
    }

    #[test]
    fn test_drain_to_success() {
        let (mut streamer, wire, events) = connected(options(100, 10, 20, 200), 0..50);
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert_eq!(batch_positions(&sent(&wire)), vec![10]);
        assert_eq!(streamer.latch_queue_len(), 0);

        streamer.finish();
        assert_eq!(streamer.state(), ConnectionState::EmptyingHost);

        // batch still in transit
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::EmptyingHost);

        status(&wire, ErrorCode::None, 50, 80);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::EmptyingDevice);

        status(&wire, ErrorCode::BufferUnderrun, 50, 99);
        assert_eq!(streamer.step().unwrap(), StepOutcome::Finished);
        assert_eq!(streamer.state(), ConnectionState::Disconnected);
        assert!(events
            .borrow()
            .contains(&StreamEvent::Finished { success: true }));
    }

    #[test]
    fn test_underrun_while_transferring_fails() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        status(&wire, ErrorCode::BufferUnderrun, 10, 99);
        assert!(matches!(
            streamer.step(),
            Err(StreamError::DeviceFault {
                code: ErrorCode::BufferUnderrun,
                ..
            })
        ));
    }

    #[test]
    fn test_finish_before_first_status() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..30);
        streamer.finish();
        assert_eq!(streamer.state(), ConnectionState::Initializing);

        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::EmptyingHost);
        assert_eq!(batch_positions(&sent(&wire)), vec![10]);
    }

    #[test]
    fn test_error_while_emptying_device_resumes() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..30);
        streamer.finish();
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        status(&wire, ErrorCode::None, 30, 90);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::EmptyingDevice);
        sent(&wire);

        // not actually there after all
        status(&wire, ErrorCode::BadChecksum, 10, 90);
        streamer.step().unwrap();
        assert_eq!(streamer.state(), ConnectionState::EmptyingHost);
        assert_eq!(batch_positions(&sent(&wire)), vec![10]);
    }

    #[test]
    fn test_invalid_packet_reported() {
        let (mut streamer, wire, events) = connected(options(100, 10, 20, 200), 0..250);
        let mut packet = StatusPacket {
            last_error: ErrorCode::None,
            stream_pos: 10,
            free_space: 90,
        }
        .encode();
        packet[6] ^= 0x01;
        wire.borrow_mut().to_host.extend(packet);
        streamer.step().unwrap();

        assert_eq!(streamer.state(), ConnectionState::Initializing);
        assert!(events
            .borrow()
            .iter()
            .any(|e| matches!(e, StreamEvent::InvalidPacket { .. })));
    }

    #[test]
    fn test_only_latest_status_is_used() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        status(&wire, ErrorCode::BadStreamPosition, 10, 90);
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert_eq!(batch_positions(&sent(&wire)), vec![10]);
    }

    #[test]
    fn test_partial_writes_resume() {
        let (mut streamer, wire, _) = connected(options(100, 10, 20, 200), 0..250);
        wire.borrow_mut().write_limit = Some(7);
        status(&wire, ErrorCode::None, 10, 90);
        streamer.step().unwrap();
        assert!(streamer.pending_output() > 0);

        let mut steps = 0;
        while streamer.pending_output() > 0 {
            streamer.step().unwrap();
            steps += 1;
            assert!(steps < 1000);
        }
        let batches = sent(&wire);
        assert_eq!(batches[0], Sent::RequestStatus);
        assert_eq!(batch_positions(&batches), vec![10]);
    }

    #[test]
    fn test_resend_window_bounded() {
        let (mut streamer, wire, _) = connected(options(100, 10, 10, 10), 0..5000);
        let mut device_pos: u16 = 10;
        for _ in 0..100 {
            status(&wire, ErrorCode::None, device_pos, 50);
            streamer.step().unwrap();
            device_pos = streamer.stream_position().unwrap();
            assert!(streamer.resend_window_len() <= 100);
        }
        assert_eq!(streamer.resend_window_len(), 100);
    }

    #[test]
    fn test_disconnect_keeps_queue() {
        let (mut streamer, _wire, events) = connected(options(100, 10, 20, 200), 0..250);
        streamer.disconnect();
        assert!(!streamer.is_connected());
        assert_eq!(streamer.latch_queue_len(), 240);
        assert!(!events
            .borrow()
            .iter()
            .any(|e| matches!(e, StreamEvent::Finished { .. })));
        assert!(matches!(
            streamer.request_status(),
            Err(StreamError::NotConnected)
        ));
    }
}
