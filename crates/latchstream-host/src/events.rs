// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Notifications emitted while bootstrapping and streaming

use std::fmt;

use latchstream_protocol::ErrorCode;

/// Streamer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Firmware started, waiting for the first status packet
    Initializing,
    /// Normal streaming
    Transferring,
    /// Producer is done; sending what is left in the queue
    EmptyingHost,
    /// Everything sent; waiting for the device to play it out
    EmptyingDevice,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Transferring => "transferring",
            ConnectionState::EmptyingHost => "emptying host",
            ConnectionState::EmptyingDevice => "emptying device",
        };
        f.write_str(name)
    }
}

/// Bootstrap progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Trying to reach the bootloader
    Connecting,
    /// No answer within the short timeout; the target needs a manual reset
    ResetRequested,
    /// Bootloader identified
    Identified {
        /// Reported bootloader version
        version: u16,
    },
    /// Priming latches taken, building the image
    BuildingFirmware {
        /// Latches embedded in the image
        priming_latches: usize,
    },
    /// Writing and verifying the image
    Downloading {
        /// Image size in words
        words: usize,
    },
    /// Firmware started; the stream link is up
    Started,
}

/// Snapshot of one valid status packet and the host's view of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Device stream position
    pub device_pos: u16,
    /// Host stream position after any rewind
    pub host_pos: u16,
    /// Free space the device reported
    pub buffer_space: usize,
    /// Latches sent but not yet counted by the device
    pub in_transit: usize,
    /// Space left once in-transit latches land
    pub usable: isize,
    /// Latches sent in response to this status
    pub sent: usize,
    /// Device buffer capacity in latches
    pub buffer_size: usize,
}

impl StatusReport {
    /// Latches stored on the device
    pub fn buffer_use(&self) -> usize {
        self.buffer_size.saturating_sub(self.buffer_space)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "D:{:05}<-P:{:05} B:{:05} T:{:05} S:{:05}",
            self.device_pos, self.host_pos, self.buffer_space, self.in_transit, self.usable
        )
    }
}

/// Something the caller may want to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bootstrap progress
    Bootstrap(BootstrapStage),
    /// Lifecycle transition
    StateChanged {
        /// Previous state
        from: ConnectionState,
        /// New state
        to: ConnectionState,
    },
    /// A valid status packet was processed
    Status(StatusReport),
    /// The device reported an error
    DeviceError {
        /// Reported code
        code: ErrorCode,
        /// Device stream position
        device_pos: u16,
    },
    /// Latches were pulled back from the resend window
    Rewound {
        /// Host position before the rewind
        from: u16,
        /// Position streaming resumes at
        to: u16,
        /// Latches re-queued
        latches: usize,
    },
    /// A packet failed validation and was dropped
    InvalidPacket {
        /// What was wrong with it
        reason: String,
    },
    /// Streaming ended
    Finished {
        /// True when the device drained cleanly
        success: bool,
    },
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEvent::Bootstrap(BootstrapStage::Connecting) => f.write_str("Connecting..."),
            StreamEvent::Bootstrap(BootstrapStage::ResetRequested) => {
                f.write_str("    (no response, please reset the target)")
            }
            StreamEvent::Bootstrap(BootstrapStage::Identified { version }) => {
                write!(f, "Bootloader version {version}")
            }
            StreamEvent::Bootstrap(BootstrapStage::BuildingFirmware { priming_latches }) => {
                write!(f, "Building firmware ({priming_latches} priming latches)...")
            }
            StreamEvent::Bootstrap(BootstrapStage::Downloading { words }) => {
                write!(f, "Downloading and starting firmware ({words} words)...")
            }
            StreamEvent::Bootstrap(BootstrapStage::Started) => f.write_str("Firmware started"),
            StreamEvent::StateChanged { to, .. } => write!(f, "State: {to}"),
            StreamEvent::Status(report) => write!(f, "  {report}"),
            StreamEvent::DeviceError { code, device_pos } => {
                let prefix = if code.is_fatal() { "FATAL ERROR" } else { "ERROR" };
                write!(f, "{prefix}: {code} (device at {device_pos})")
            }
            StreamEvent::Rewound { from, to, latches } => {
                write!(f, "Rewound {latches} latches: {from} -> {to}")
            }
            StreamEvent::InvalidPacket { reason } => {
                write!(f, "WARNING: invalid packet received: {reason}")
            }
            StreamEvent::Finished { success: true } => f.write_str("Playback complete"),
            StreamEvent::Finished { success: false } => f.write_str("Playback failed"),
        }
    }
}

/// Receives notifications from the streamer
pub trait StreamObserver {
    /// Handle one notification
    fn on_event(&mut self, event: &StreamEvent);
}

impl<F> StreamObserver for F
where
    F: FnMut(&StreamEvent),
{
    fn on_event(&mut self, event: &StreamEvent) {
        self(event)
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl StreamObserver for NullObserver {
    fn on_event(&mut self, _event: &StreamEvent) {}
}
