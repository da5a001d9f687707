// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Byte-at-a-time command receiver.
//!
//! The device feeds every received byte through [`Receiver::push_byte`] and
//! services the output register in between, so no byte ever waits on a whole
//! packet. The receiver only parses; the device decides what a command means
//! and tells the receiver whether to take or skip the payload that follows.

use heapless::Vec;
use latchstream_protocol::{Command, Crc16Kermit, ErrorCode, HEADER, HELLO_COMMAND_WORD};

/// Bytes after the header in a streaming command packet
const COMMAND_BODY_LEN: usize = 10;
/// Bytes after the header in a hello packet
const HELLO_BODY_LEN: usize = 8;

/// Something the device has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    /// A command packet whose checksum validated
    Command(Command),
    /// The bootloader hello command
    Hello,
    /// One word of an accepted batch; `index` counts words from the batch start
    LatchWord {
        /// Word offset within the batch
        index: usize,
        /// The word
        word: u16,
    },
    /// The batch checksum arrived
    BatchComplete {
        /// Whether it validated
        valid: bool,
    },
    /// Malformed input
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Header,
    HeaderHigh,
    Body,
    Payload { remaining: usize, index: usize, low: Option<u8> },
    PayloadCrc { received: usize },
    Discard { remaining: usize },
}

/// Receive state machine
#[derive(Debug, Clone)]
pub struct Receiver {
    state: RxState,
    crc: Crc16Kermit,
    body: Vec<u8, COMMAND_BODY_LEN>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    /// Create a receiver waiting for a header
    pub fn new() -> Self {
        Self {
            state: RxState::Header,
            crc: Crc16Kermit::new(),
            body: Vec::new(),
        }
    }

    /// Waiting for the start of a packet
    pub fn is_idle(&self) -> bool {
        self.state == RxState::Header
    }

    /// Abandon whatever was in progress
    pub fn reset(&mut self) {
        self.state = RxState::Header;
        self.body.clear();
        self.crc.reset();
    }

    /// Accept `words` of latch data (plus their CRC) after a send-latches command
    pub fn expect_latch_data(&mut self, words: usize) {
        self.crc.reset();
        self.state = if words == 0 {
            RxState::PayloadCrc { received: 0 }
        } else {
            RxState::Payload {
                remaining: words,
                index: 0,
                low: None,
            }
        };
    }

    /// Skip `bytes` without interpreting them
    pub fn discard(&mut self, bytes: usize) {
        self.state = if bytes == 0 {
            RxState::Header
        } else {
            RxState::Discard { remaining: bytes }
        };
    }

    /// Feed one received byte
    pub fn push_byte(&mut self, byte: u8) -> Option<RxEvent> {
        match self.state {
            RxState::Header => {
                if byte == HEADER[0] {
                    self.state = RxState::HeaderHigh;
                    None
                } else {
                    Some(RxEvent::Error(ErrorCode::InvalidCommand))
                }
            }
            RxState::HeaderHigh => {
                if byte == HEADER[1] {
                    self.state = RxState::Body;
                    self.body.clear();
                    self.crc.reset();
                    None
                } else if byte == HEADER[0] {
                    None
                } else {
                    self.state = RxState::Header;
                    Some(RxEvent::Error(ErrorCode::InvalidCommand))
                }
            }
            RxState::Body => self.push_body(byte),
            RxState::Payload {
                remaining,
                index,
                low,
            } => {
                self.crc.update_byte(byte);
                match low {
                    None => {
                        self.state = RxState::Payload {
                            remaining,
                            index,
                            low: Some(byte),
                        };
                        None
                    }
                    Some(low) => {
                        self.state = if remaining == 1 {
                            RxState::PayloadCrc { received: 0 }
                        } else {
                            RxState::Payload {
                                remaining: remaining - 1,
                                index: index + 1,
                                low: None,
                            }
                        };
                        Some(RxEvent::LatchWord {
                            index,
                            word: u16::from_le_bytes([low, byte]),
                        })
                    }
                }
            }
            RxState::PayloadCrc { received } => {
                self.crc.update_byte(byte);
                if received == 0 {
                    self.state = RxState::PayloadCrc { received: 1 };
                    None
                } else {
                    self.state = RxState::Header;
                    Some(RxEvent::BatchComplete {
                        valid: self.crc.is_valid(),
                    })
                }
            }
            RxState::Discard { remaining } => {
                self.state = if remaining <= 1 {
                    RxState::Header
                } else {
                    RxState::Discard {
                        remaining: remaining - 1,
                    }
                };
                None
            }
        }
    }

    fn push_body(&mut self, byte: u8) -> Option<RxEvent> {
        self.crc.update_byte(byte);
        if self.body.push(byte).is_err() {
            self.reset();
            return Some(RxEvent::Error(ErrorCode::ReceiveError));
        }

        let len = self.body.len();

        // hello is one parameter shorter than everything else
        if len == HELLO_BODY_LEN && word_at(&self.body, 0) == HELLO_COMMAND_WORD {
            self.state = RxState::Header;
            return Some(if self.crc.is_valid() {
                RxEvent::Hello
            } else {
                RxEvent::Error(ErrorCode::BadChecksum)
            });
        }
        if len < COMMAND_BODY_LEN {
            return None;
        }

        self.state = RxState::Header;
        if !self.crc.is_valid() {
            return Some(RxEvent::Error(ErrorCode::BadChecksum));
        }
        let word = word_at(&self.body, 0);
        let params = [
            word_at(&self.body, 2),
            word_at(&self.body, 4),
            word_at(&self.body, 6),
        ];
        Some(match Command::from_parts(word, params) {
            Ok(command) => RxEvent::Command(command),
            Err(_) => RxEvent::Error(ErrorCode::InvalidCommand),
        })
    }
}

fn word_at(body: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([body[at], body[at + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as AllocVec;
    use latchstream_protocol::{encode_hello, encode_latch_data, encode_send_latches};

    fn feed(rx: &mut Receiver, bytes: &[u8]) -> AllocVec<RxEvent> {
        bytes.iter().filter_map(|&b| rx.push_byte(b)).collect()
    }

    #[test]
    fn test_request_status() {
        let mut rx = Receiver::new();
        let events = feed(&mut rx, &Command::RequestStatus.encode());
        assert_eq!(events, [RxEvent::Command(Command::RequestStatus)]);
        assert!(rx.is_idle());
    }

    #[test]
    fn test_send_latches_with_payload() {
        let mut rx = Receiver::new();
        let data = encode_latch_data(&[0x1111, 0x2222]);
        let frame = encode_send_latches(10, 1, &data).unwrap();

        let events = feed(&mut rx, &frame[..12]);
        assert_eq!(
            events,
            [RxEvent::Command(Command::SendLatches {
                stream_pos: 10,
                latch_count: 2
            })]
        );
        rx.expect_latch_data(2);
        let events = feed(&mut rx, &frame[12..]);
        assert_eq!(
            events,
            [
                RxEvent::LatchWord { index: 0, word: 0x1111 },
                RxEvent::LatchWord { index: 1, word: 0x2222 },
                RxEvent::BatchComplete { valid: true },
            ]
        );
    }

    #[test]
    fn test_corrupt_payload() {
        let mut rx = Receiver::new();
        let data = encode_latch_data(&[7]);
        let mut frame = encode_send_latches(0, 1, &data).unwrap();
        frame[12] ^= 0x80;
        feed(&mut rx, &frame[..12]);
        rx.expect_latch_data(1);
        let events = feed(&mut rx, &frame[12..]);
        assert_eq!(events.last(), Some(&RxEvent::BatchComplete { valid: false }));
    }

    #[test]
    fn test_bad_command_crc() {
        let mut rx = Receiver::new();
        let mut frame = Command::RequestStatus.encode();
        frame[5] ^= 0x04;
        let events = feed(&mut rx, &frame);
        assert_eq!(events, [RxEvent::Error(ErrorCode::BadChecksum)]);
    }

    #[test]
    fn test_junk_and_repeated_header_byte() {
        let mut rx = Receiver::new();
        assert_eq!(rx.push_byte(0x00), Some(RxEvent::Error(ErrorCode::InvalidCommand)));
        assert_eq!(rx.push_byte(0x5A), None);
        assert_eq!(rx.push_byte(0x5A), None);
        let events = feed(&mut rx, &Command::RequestStatus.encode()[1..]);
        assert_eq!(events, [RxEvent::Command(Command::RequestStatus)]);
    }

    #[test]
    fn test_discard_then_next_packet() {
        let mut rx = Receiver::new();
        rx.discard(4);
        assert!(feed(&mut rx, &[0x5A, 0x7A, 0x01, 0x02]).is_empty());
        assert!(rx.is_idle());
        let events = feed(&mut rx, &Command::RequestStatus.encode());
        assert_eq!(events, [RxEvent::Command(Command::RequestStatus)]);
    }

    #[test]
    fn test_hello() {
        let mut rx = Receiver::new();
        assert_eq!(feed(&mut rx, &encode_hello()), [RxEvent::Hello]);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut rx = Receiver::new();
        let mut frame = Command::RequestStatus.encode();
        frame[3] = 0x42;
        let crc = latchstream_protocol::crc16_kermit(&frame[2..10]);
        frame[10..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(
            feed(&mut rx, &frame),
            [RxEvent::Error(ErrorCode::InvalidCommand)]
        );
    }

    #[test]
    fn test_reset_mid_packet() {
        let mut rx = Receiver::new();
        feed(&mut rx, &Command::RequestStatus.encode()[..6]);
        assert!(!rx.is_idle());
        rx.reset();
        assert!(rx.is_idle());
    }
}
