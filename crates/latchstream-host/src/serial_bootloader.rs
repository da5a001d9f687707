// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client for the target's serial bootloader
//!
//! Commands are three little-endian words plus a CRC-16/KERMIT:
//!
//! ```text
//! ┌─────────────────┬──────────┬──────────┬──────────┐
//! │ (cmd << 8) | 2  │ Param 1  │ Param 2  │ CRC      │
//! └─────────────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! and every response is `[0x0101, status, crc]`, status 3 meaning success.
//! Reads are followed by the data words, their CRC and a second response;
//! writes send the data and its CRC straight after the command without
//! waiting, then collect both responses.

use std::time::{Duration, Instant};

use latchstream_config::LatchstreamConfig;
use latchstream_protocol::crc16_kermit;
use tracing::{debug, trace};

use crate::bootstrap::Bootloader;
use crate::error::{BootError, BootResult};
use crate::link::SerialLink;

/// Only response word the bootloader sends
const RESPONSE_WORD: u16 = 0x0101;
const RESPONSE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum BootCommand {
    Hello = 1,
    WriteMemory = 2,
    StartExecution = 3,
    ReadMemory = 4,
}

impl BootCommand {
    fn encode(self, param1: u16, param2: u16) -> [u8; 8] {
        let word = (u16::from(self as u8) << 8) | 2;
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&word.to_le_bytes());
        out[2..4].copy_from_slice(&param1.to_le_bytes());
        out[4..6].copy_from_slice(&param2.to_le_bytes());
        let crc = crc16_kermit(&out[..6]);
        out[6..8].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

/// Timing and identity expectations for [`SerialBootloader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderSettings {
    /// Read timeout while talking to the bootloader
    pub command_timeout: Duration,
    /// Read timeout handed to the streamer once the firmware runs
    pub stream_timeout: Duration,
    /// First word of the ROM identity block
    pub rom_info_address: u16,
    /// Identity block length; the version is the last word
    pub rom_info_words: u16,
    pub expected_version: u16,
}

impl Default for BootloaderSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(200),
            stream_timeout: Duration::from_millis(1),
            rom_info_address: 0xFFB8,
            rom_info_words: 8,
            expected_version: 3,
        }
    }
}

impl BootloaderSettings {
    pub fn from_config(config: &LatchstreamConfig) -> Self {
        Self {
            command_timeout: Duration::from_millis(config.bootstrap.timeout_ms),
            stream_timeout: Duration::from_millis(config.link.read_timeout_ms),
            rom_info_address: config.bootstrap.rom_info_address,
            rom_info_words: config.bootstrap.rom_info_words,
            expected_version: config.bootstrap.expected_version,
        }
    }
}

/// [`Bootloader`] speaking the serial bootloader protocol over any link
///
/// The link's reads must time out (returning zero bytes) rather than block
/// forever; a zero-length read is treated as a timeout.
pub struct SerialBootloader<L: SerialLink> {
    link: L,
    settings: BootloaderSettings,
    connected: bool,
}

#[cfg(feature = "serial")]
impl SerialBootloader<crate::link::SerialPortLink> {
    /// Open a serial port for bootloading
    pub fn open(path: &str, baud_rate: u32, settings: BootloaderSettings) -> BootResult<Self> {
        let link = crate::link::SerialPortLink::open(path, baud_rate, settings.command_timeout)?;
        Ok(Self::new(link, settings))
    }
}

impl<L: SerialLink> SerialBootloader<L> {
    pub fn new(link: L, settings: BootloaderSettings) -> Self {
        Self {
            link,
            settings,
            connected: false,
        }
    }

    pub fn settings(&self) -> &BootloaderSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> BootResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.link.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(BootError::Timeout("read timeout".into()));
            }
            filled += n;
        }
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> BootResult<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = self.link.write(&data[sent..])?;
            if n == 0 {
                return Err(BootError::Timeout("write timeout".into()));
            }
            sent += n;
        }
        self.link.flush()?;
        Ok(())
    }

    fn send_command(&mut self, command: BootCommand, param1: u16, param2: u16) -> BootResult<()> {
        // junk from an earlier failed command must not be taken as a response
        self.link.clear_buffers()?;
        trace!(?command, param1, param2, "bootloader command");
        self.write_all(&command.encode(param1, param2))
    }

    fn check_response(&mut self) -> BootResult<()> {
        let mut response = [0u8; RESPONSE_LEN];
        self.read_exact(&mut response)?;

        let residue = crc16_kermit(&response);
        if residue != 0 {
            return Err(BootError::BadCrc { residue });
        }
        let word = u16::from_le_bytes([response[0], response[1]]);
        if word != RESPONSE_WORD {
            return Err(BootError::UnexpectedResponse(word));
        }
        match u16::from_le_bytes([response[2], response[3]]) {
            3 => Ok(()),
            2 => Err(BootError::Timeout("target said 'RX error/timeout'".into())),
            1 => Err(BootError::TargetRefused("bad CRC".into())),
            0 => Err(BootError::TargetRefused("unknown/invalid command".into())),
            other => Err(BootError::TargetRefused(other.to_string())),
        }
    }

    fn require_connected(&self) -> BootResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BootError::NotConnected)
        }
    }

    fn length_param(length: usize) -> BootResult<u16> {
        u16::try_from(length)
            .map_err(|_| BootError::Image(format!("{length} words do not fit one transfer")))
    }
}

impl<L: SerialLink + 'static> Bootloader for SerialBootloader<L> {
    type Link = L;

    fn connect(&mut self, timeout: Option<Duration>) -> BootResult<()> {
        self.link.set_read_timeout(self.settings.command_timeout)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BootError::Timeout("connection timeout".into()));
            }
            self.send_command(BootCommand::Hello, 0, 0)?;
            match self.check_response() {
                Ok(()) => {
                    debug!("bootloader answered hello");
                    self.connected = true;
                    return Ok(());
                }
                // the target may still be timing out an earlier packet
                Err(BootError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn identify(&mut self) -> BootResult<u16> {
        let info = self.read_memory(
            self.settings.rom_info_address,
            usize::from(self.settings.rom_info_words),
        )?;
        let version = info.last().copied().unwrap_or_default();
        if version != self.settings.expected_version {
            return Err(BootError::WrongVersion {
                found: version,
                expected: self.settings.expected_version,
            });
        }
        Ok(version)
    }

    fn write_memory(&mut self, address: u16, words: &[u16]) -> BootResult<()> {
        self.require_connected()?;
        let length = Self::length_param(words.len())?;
        self.send_command(BootCommand::WriteMemory, address, length)?;

        let mut data = latchstream_protocol::encode_latch_data(words);
        let crc = crc16_kermit(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        self.write_all(&data)?;

        // one for the command, one for the data
        self.check_response()?;
        self.check_response()?;
        debug!(address, words = words.len(), "memory written");
        Ok(())
    }

    fn read_memory(&mut self, address: u16, length: usize) -> BootResult<Vec<u16>> {
        self.require_connected()?;
        let length_word = Self::length_param(length)?;
        self.send_command(BootCommand::ReadMemory, address, length_word)?;
        self.check_response()?;

        let mut data = vec![0u8; 2 * (length + 1)];
        self.read_exact(&mut data)?;
        self.check_response()?;

        let residue = crc16_kermit(&data);
        if residue != 0 {
            return Err(BootError::BadCrc { residue });
        }
        data.truncate(2 * length);
        Ok(latchstream_protocol::words_from_le_bytes(&data))
    }

    fn start_execution(mut self, address: u16) -> BootResult<L> {
        self.require_connected()?;
        self.send_command(BootCommand::StartExecution, address, 0)?;
        self.check_response()?;
        self.link.set_read_timeout(self.settings.stream_timeout)?;
        debug!(address, "execution started");
        Ok(self.link)
    }
}
