// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reading recorded latch files
//!
//! The file holds one 16-byte entry per latch: eight big-endian words, one per
//! controller channel. Only channels 0, 1, 4 and 5 are played; they become
//! the first four words of a record and the fifth (clock) word is zero.

use std::io::{self, ErrorKind, Read};

use latchstream_host::LatchSource;
use tracing::{debug, error, warn};

/// Bytes per latch in the file
pub const FILE_LATCH_BYTES: usize = 16;

/// Words per record produced by [`LatchFile`]
pub const RECORD_WIDTH: usize = 5;

/// File channels that are played, in record order
const CHANNELS: [usize; 4] = [0, 1, 4, 5];

/// [`LatchSource`] over a recorded latch file
pub struct LatchFile<R: Read> {
    reader: R,
    latches_read: u64,
    done: bool,
    failed: Option<io::Error>,
}

impl<R: Read> LatchFile<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            latches_read: 0,
            done: false,
            failed: None,
        }
    }

    /// Latches handed out so far
    pub fn latches_read(&self) -> u64 {
        self.latches_read
    }

    /// Fill `buf` unless the file ends or fails first; returns the bytes read
    ///
    /// A failure is kept in `failed` so the bytes before it still count.
    fn read_full(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, after = self.latches_read, "latch file read failed");
                    self.failed = Some(e);
                    break;
                }
            }
        }
        filled
    }
}

/// Convert one file entry into a record
pub fn decode_entry(entry: &[u8]) -> [u16; RECORD_WIDTH] {
    let mut record = [0u16; RECORD_WIDTH];
    for (slot, channel) in record.iter_mut().zip(CHANNELS) {
        *slot = u16::from_be_bytes([entry[channel * 2], entry[channel * 2 + 1]]);
    }
    record
}

impl<R: Read> LatchSource for LatchFile<R> {
    fn read_latches(&mut self, max_latches: usize) -> io::Result<Option<Vec<u16>>> {
        if let Some(e) = self.failed.take() {
            self.done = true;
            return Err(e);
        }
        if self.done {
            return Ok(None);
        }
        if max_latches == 0 {
            return Ok(Some(Vec::new()));
        }

        let mut bytes = vec![0u8; max_latches * FILE_LATCH_BYTES];
        let filled = self.read_full(&mut bytes);
        let latches = filled / FILE_LATCH_BYTES;
        if self.failed.is_some() {
            // hand out what arrived; the error is reported next time
            if latches == 0 {
                return self.read_latches(0);
            }
        } else if filled < bytes.len() {
            self.done = true;
            if filled % FILE_LATCH_BYTES != 0 {
                warn!(
                    bytes = filled % FILE_LATCH_BYTES,
                    "ignoring partial latch at end of file"
                );
            }
        }

        if latches == 0 {
            debug!(total = self.latches_read, "latch file exhausted");
            return Ok(None);
        }
        self.latches_read += latches as u64;
        Ok(Some(
            bytes[..latches * FILE_LATCH_BYTES]
                .chunks_exact(FILE_LATCH_BYTES)
                .flat_map(decode_entry)
                .collect(),
        ))
    }
}
