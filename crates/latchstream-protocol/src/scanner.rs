// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Status packet scanner used by the host.
//!
//! Bytes arrive in arbitrary chunks. The scanner looks for the header, checks
//! the checksum, and on any failure drops the header bytes and scans on, so a
//! corrupted packet costs at most its own bytes.

use alloc::vec::Vec;

use crate::error::ProtocolError;
use crate::packet::{decode_status, StatusPacket, HEADER, PACKET_LEN};

/// One result pulled out of the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A packet whose checksum validated
    Status(StatusPacket),
    /// Bytes that were thrown away, and why
    Rejected(ProtocolError),
}

/// Incremental status packet parser
#[derive(Debug, Default)]
pub struct StatusScanner {
    buffer: Vec<u8>,
}

impl StatusScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next packet or rejection out of the buffer
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Option<ScanEvent> {
        match find_header(&self.buffer) {
            None => {
                // a lone trailing 0x5A may be the first half of a header
                let keep = usize::from(self.buffer.last() == Some(&HEADER[0]));
                let discarded = self.buffer.len() - keep;
                if discarded == 0 {
                    return None;
                }
                self.buffer.drain(..discarded);
                Some(ScanEvent::Rejected(ProtocolError::Framing { discarded }))
            }
            Some(0) => {
                if self.buffer.len() < PACKET_LEN {
                    return None;
                }
                match decode_status(&self.buffer[..PACKET_LEN]) {
                    Ok(status) => {
                        self.buffer.drain(..PACKET_LEN);
                        Some(ScanEvent::Status(status))
                    }
                    Err(err) => {
                        // skip just the header; a real packet may start inside
                        self.buffer.drain(..HEADER.len());
                        Some(ScanEvent::Rejected(err))
                    }
                }
            }
            Some(at) => {
                self.buffer.drain(..at);
                Some(ScanEvent::Rejected(ProtocolError::Framing { discarded: at }))
            }
        }
    }
}

fn find_header(bytes: &[u8]) -> Option<usize> {
    bytes.windows(HEADER.len()).position(|pair| pair == HEADER)
}
