// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use alloc::vec::Vec;
use core::fmt;

use crate::crc::{crc16_kermit, Crc16Kermit};
use crate::error::{ProtocolError, ProtocolResult};

/// Sync pattern preceding every packet, as it appears on the wire
pub const HEADER: [u8; 2] = [0x5A, 0x7A];
/// The header read as a little-endian word
pub const HEADER_WORD: u16 = 0x7A5A;
/// Parameter count carried by every streaming command and status packet
pub const PARAM_COUNT: u8 = 3;
/// Size of a command or status packet including header and CRC
pub const PACKET_LEN: usize = 2 + 2 + 2 * PARAM_COUNT as usize + 2;
/// Response code of a status packet
pub const STATUS_CODE: u8 = 0x10;
/// Bootloader "hello" command word (command 1, two parameters)
pub const HELLO_COMMAND_WORD: u16 = 0x0102;
/// Size of a header-prefixed hello packet
pub const HELLO_PACKET_LEN: usize = 2 + 2 + 2 * 2 + 2;

/// Build a command word from an opcode and its parameter count
pub const fn command_word(opcode: u8, param_count: u8) -> u16 {
    ((opcode as u16) << 8) | param_count as u16
}

/// Streaming command opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Latch data follows the command
    SendLatches = 0x10,
    /// Ask for an immediate status packet
    RequestStatus = 0x11,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Opcode::SendLatches),
            0x11 => Ok(Opcode::RequestStatus),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// Device error codes carried in status packets
///
/// Codes at or above `0x40` are fatal: the ring buffer contents can no longer
/// be trusted and the device needs a full reconnection. Unrecognized codes are
/// preserved and classified by the same threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    /// Nothing is wrong
    #[default]
    None,
    /// Unknown command or malformed header
    InvalidCommand,
    /// Command or latch data checksum failed
    BadChecksum,
    /// UART error or a batch that would overflow the buffer
    ReceiveError,
    /// A partially received packet went idle
    ReceiveTimeout,
    /// Send-latches command did not start at the device's stream position
    BadStreamPosition,
    /// A latch event found the ring buffer empty
    BufferUnderrun,
    /// A second latch event arrived before the first was serviced
    MissedLatch,
    /// Code outside the known vocabulary
    Unknown(u16),
}

impl ErrorCode {
    /// First code considered fatal
    pub const FATAL_START: u16 = 0x40;

    /// Decode a status packet's error word
    pub fn from_word(word: u16) -> Self {
        match word {
            0x00 => ErrorCode::None,
            0x01 => ErrorCode::InvalidCommand,
            0x02 => ErrorCode::BadChecksum,
            0x03 => ErrorCode::ReceiveError,
            0x04 => ErrorCode::ReceiveTimeout,
            0x05 => ErrorCode::BadStreamPosition,
            0x40 => ErrorCode::BufferUnderrun,
            0x41 => ErrorCode::MissedLatch,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Wire representation
    pub fn word(self) -> u16 {
        match self {
            ErrorCode::None => 0x00,
            ErrorCode::InvalidCommand => 0x01,
            ErrorCode::BadChecksum => 0x02,
            ErrorCode::ReceiveError => 0x03,
            ErrorCode::ReceiveTimeout => 0x04,
            ErrorCode::BadStreamPosition => 0x05,
            ErrorCode::BufferUnderrun => 0x40,
            ErrorCode::MissedLatch => 0x41,
            ErrorCode::Unknown(word) => word,
        }
    }

    /// True for anything other than [`ErrorCode::None`]
    pub fn is_error(self) -> bool {
        self != ErrorCode::None
    }

    /// True when the device cannot continue streaming
    pub fn is_fatal(self) -> bool {
        self.word() >= Self::FATAL_START
    }

    /// Short human readable description
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::None => "none",
            ErrorCode::InvalidCommand => "invalid command",
            ErrorCode::BadChecksum => "bad checksum",
            ErrorCode::ReceiveError => "receive error/overflow",
            ErrorCode::ReceiveTimeout => "receive timeout",
            ErrorCode::BadStreamPosition => "bad stream position",
            ErrorCode::BufferUnderrun => "buffer underrun",
            ErrorCode::MissedLatch => "missed latch",
            ErrorCode::Unknown(_) => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_fatal() { "fatal" } else { "recoverable" };
        write!(f, "{} (0x{:02X}, {})", self.description(), self.word(), kind)
    }
}

/// Streaming command as carried in a command packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `latch_count` records follow, to be stored starting at `stream_pos`
    SendLatches {
        /// Stream position of the first latch in the batch
        stream_pos: u16,
        /// Number of latch records that follow
        latch_count: u16,
    },
    /// Reply with a status packet immediately
    RequestStatus,
}

impl Command {
    /// Opcode of this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::SendLatches { .. } => Opcode::SendLatches,
            Command::RequestStatus => Opcode::RequestStatus,
        }
    }

    /// The three parameter words
    pub fn params(&self) -> [u16; 3] {
        match *self {
            Command::SendLatches {
                stream_pos,
                latch_count,
            } => [stream_pos, latch_count, 0],
            Command::RequestStatus => [0, 0, 0],
        }
    }

    /// Encode as a complete command packet
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        encode_frame(command_word(self.opcode() as u8, PARAM_COUNT), self.params())
    }

    /// Interpret a checksum-validated command word and parameters
    pub fn from_parts(word: u16, params: [u16; 3]) -> ProtocolResult<Self> {
        if (word & 0xFF) as u8 != PARAM_COUNT {
            return Err(ProtocolError::BadCommandWord(word));
        }
        match Opcode::try_from((word >> 8) as u8)? {
            Opcode::SendLatches => Ok(Command::SendLatches {
                stream_pos: params[0],
                latch_count: params[1],
            }),
            Opcode::RequestStatus => Ok(Command::RequestStatus),
        }
    }
}

/// Device status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusPacket {
    /// Most recent error (sticky when fatal)
    pub last_error: ErrorCode,
    /// Committed stream position
    pub stream_pos: u16,
    /// Free latch slots in the ring buffer
    pub free_space: u16,
}

impl StatusPacket {
    /// Encode as a complete status packet
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        encode_frame(
            command_word(STATUS_CODE, PARAM_COUNT),
            [self.last_error.word(), self.stream_pos, self.free_space],
        )
    }
}

fn encode_frame(word: u16, params: [u16; 3]) -> [u8; PACKET_LEN] {
    let mut frame = [0u8; PACKET_LEN];
    frame[0..2].copy_from_slice(&HEADER);
    frame[2..4].copy_from_slice(&word.to_le_bytes());
    for (i, param) in params.iter().enumerate() {
        let at = 4 + i * 2;
        frame[at..at + 2].copy_from_slice(&param.to_le_bytes());
    }
    let crc = crc16_kermit(&frame[2..PACKET_LEN - 2]);
    frame[PACKET_LEN - 2..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Check the header and checksum of a fixed-size frame and split out its words
fn decode_frame(bytes: &[u8]) -> ProtocolResult<(u16, [u16; 3])> {
    if bytes.len() < PACKET_LEN {
        return Err(ProtocolError::Truncated {
            expected: PACKET_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0..2] != HEADER {
        return Err(ProtocolError::Framing { discarded: 0 });
    }
    let mut crc = Crc16Kermit::new();
    crc.update(&bytes[2..PACKET_LEN]);
    if !crc.is_valid() {
        return Err(ProtocolError::Checksum {
            residue: crc.value(),
        });
    }
    let word_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    Ok((word_at(2), [word_at(4), word_at(6), word_at(8)]))
}

/// Decode a command packet (header included)
pub fn decode_command(bytes: &[u8]) -> ProtocolResult<Command> {
    let (word, params) = decode_frame(bytes)?;
    Command::from_parts(word, params)
}

/// Decode a status packet (header included)
pub fn decode_status(bytes: &[u8]) -> ProtocolResult<StatusPacket> {
    let (word, params) = decode_frame(bytes)?;
    if word != command_word(STATUS_CODE, PARAM_COUNT) {
        return Err(ProtocolError::BadCommandWord(word));
    }
    Ok(StatusPacket {
        last_error: ErrorCode::from_word(params[0]),
        stream_pos: params[1],
        free_space: params[2],
    })
}

/// Header-prefixed bootloader hello, which makes a running device reset
/// into its bootloader
pub fn encode_hello() -> [u8; HELLO_PACKET_LEN] {
    let mut frame = [0u8; HELLO_PACKET_LEN];
    frame[0..2].copy_from_slice(&HEADER);
    frame[2..4].copy_from_slice(&HELLO_COMMAND_WORD.to_le_bytes());
    let crc = crc16_kermit(&frame[2..HELLO_PACKET_LEN - 2]);
    frame[HELLO_PACKET_LEN - 2..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Serialize latch words little-endian, without a checksum
pub fn encode_latch_data(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_latch_data`]; a trailing odd byte is ignored
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Frame a send-latches command followed by its data and data checksum
///
/// `data` holds whole latch records, already serialized with
/// [`encode_latch_data`].
pub fn encode_send_latches(
    stream_pos: u16,
    record_width: usize,
    data: &[u8],
) -> ProtocolResult<Vec<u8>> {
    if record_width == 0 {
        return Err(ProtocolError::InvalidLatchData("record width is zero"));
    }
    let record_bytes = record_width * 2;
    if data.len() % record_bytes != 0 {
        return Err(ProtocolError::InvalidLatchData(
            "data is not a whole number of records",
        ));
    }
    let latch_count = u16::try_from(data.len() / record_bytes)
        .map_err(|_| ProtocolError::InvalidLatchData("too many latches for one command"))?;

    let command = Command::SendLatches {
        stream_pos,
        latch_count,
    };
    let mut out = Vec::with_capacity(PACKET_LEN + data.len() + 2);
    out.extend_from_slice(&command.encode());
    out.extend_from_slice(data);
    out.extend_from_slice(&crc16_kermit(data).to_le_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_packet_len() {
        assert_eq!(PACKET_LEN, 12);
        assert_eq!(HELLO_PACKET_LEN, 10);
    }

    #[test]
    fn test_status_wire_layout() {
        let status = StatusPacket {
            last_error: ErrorCode::BadChecksum,
            stream_pos: 0x1234,
            free_space: 0x0050,
        };
        let frame = status.encode();
        assert_eq!(&frame[0..10], &[0x5A, 0x7A, 0x03, 0x10, 0x02, 0x00, 0x34, 0x12, 0x50, 0x00]);
        assert_eq!(crc16_kermit(&frame[2..]), 0);
        assert_eq!(decode_status(&frame), Ok(status));
    }

    #[test]
    fn test_request_status_layout() {
        let frame = Command::RequestStatus.encode();
        assert_eq!(&frame[0..4], &[0x5A, 0x7A, 0x03, 0x11]);
        assert_eq!(decode_command(&frame), Ok(Command::RequestStatus));
    }

    #[test]
    fn test_status_rejects_command_word() {
        let frame = Command::RequestStatus.encode();
        assert_eq!(
            decode_status(&frame),
            Err(ProtocolError::BadCommandWord(0x1103))
        );
    }

    #[test]
    fn test_bad_header() {
        let mut frame = StatusPacket::default().encode();
        frame[1] = 0x7B;
        assert!(matches!(
            decode_status(&frame),
            Err(ProtocolError::Framing { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let frame = StatusPacket::default().encode();
        assert_eq!(
            decode_status(&frame[..11]),
            Err(ProtocolError::Truncated {
                expected: 12,
                actual: 11
            })
        );
    }

    #[test]
    fn test_unknown_opcode_and_param_count() {
        assert_eq!(
            Command::from_parts(0x2003, [0; 3]),
            Err(ProtocolError::UnknownOpcode(0x20))
        );
        assert_eq!(
            Command::from_parts(0x1002, [0; 3]),
            Err(ProtocolError::BadCommandWord(0x1002))
        );
    }

    #[test]
    fn test_error_code_classification() {
        assert!(!ErrorCode::None.is_error());
        assert!(!ErrorCode::BadStreamPosition.is_fatal());
        assert!(ErrorCode::BufferUnderrun.is_fatal());
        assert!(ErrorCode::MissedLatch.is_fatal());
        assert!(ErrorCode::from_word(0x7F).is_fatal());
        assert!(!ErrorCode::from_word(0x3F).is_fatal());
        assert_eq!(ErrorCode::from_word(0x7F), ErrorCode::Unknown(0x7F));
        for word in [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x40, 0x41, 0x99] {
            assert_eq!(ErrorCode::from_word(word).word(), word);
        }
    }

    #[test]
    fn test_send_latches_framing() {
        let data = encode_latch_data(&[1, 2, 3, 4, 5, 6]);
        let bytes = encode_send_latches(40, 2, &data).unwrap();
        assert_eq!(bytes.len(), PACKET_LEN + 12 + 2);
        assert_eq!(
            decode_command(&bytes[..PACKET_LEN]),
            Ok(Command::SendLatches {
                stream_pos: 40,
                latch_count: 3
            })
        );
        assert_eq!(&bytes[PACKET_LEN..PACKET_LEN + 12], data.as_slice());
        // data CRC covers the data words only
        assert_eq!(crc16_kermit(&bytes[PACKET_LEN..]), 0);
    }

    #[test]
    fn test_send_latches_rejects_partial_record() {
        let data = encode_latch_data(&[1, 2, 3]);
        assert!(encode_send_latches(0, 2, &data).is_err());
        assert!(encode_send_latches(0, 0, &data).is_err());
    }

    #[test]
    fn test_words_from_bytes() {
        let words = vec![0x0102, 0xFFEE, 0];
        assert_eq!(words_from_le_bytes(&encode_latch_data(&words)), words);
    }

    #[test]
    fn test_hello() {
        let hello = encode_hello();
        assert_eq!(&hello[0..4], &[0x5A, 0x7A, 0x02, 0x01]);
        assert_eq!(crc16_kermit(&hello[2..]), 0);
    }
}
