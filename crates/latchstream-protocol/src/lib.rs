// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

#![no_std]
#![warn(missing_docs)]

//! # Latch Stream Protocol
//!
//! Transport-agnostic wire codec shared by the playback device and the host
//! streamer. Everything here is pure encode/decode; the only state is the
//! running checksum and the host-side status scanner's byte buffer.
//!
//! ## Packet Format
//!
//! ```text
//! ┌──────────┬───────────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Header   │ Command word  │ Param 1  │ Param 2  │ Param 3  │ CRC      │
//! │ 5A 7A    │ count │ code  │ u16 LE   │ u16 LE   │ u16 LE   │ u16 LE   │
//! └──────────┴───────────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! The CRC is CRC-16/KERMIT over every byte after the header. A send-latches
//! command is followed by `count × record_width` data words and a second CRC
//! covering the data words only.
//!
//! ### Commands
//!
//! | Code | Name | Params | Description |
//! |------|------|--------|-------------|
//! | 0x10 | SendLatches | stream position, latch count, 0 | Latch data follows |
//! | 0x11 | RequestStatus | unused | Ask for an immediate status packet |
//!
//! The device answers with status packets (code 0x10) carrying
//! `(last_error, stream_position, free_space)`.

extern crate alloc;

/// CRC-16/KERMIT running checksum
pub mod crc;

/// Protocol error types
pub mod error;

/// Command and status packet layout
pub mod packet;

/// Host-side status packet scanner with resynchronization
pub mod scanner;

pub use crc::{crc16_kermit, crc16_kermit_words, Crc16Kermit};
pub use error::{ProtocolError, ProtocolResult};
pub use packet::{
    command_word, decode_command, decode_status, encode_hello, encode_latch_data,
    encode_send_latches, words_from_le_bytes, Command, ErrorCode, Opcode, StatusPacket,
    HEADER, HEADER_WORD, HELLO_COMMAND_WORD, HELLO_PACKET_LEN, PACKET_LEN, PARAM_COUNT,
    STATUS_CODE,
};
pub use scanner::{ScanEvent, StatusScanner};
