// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Latch Streamer (host side)
//!
//! Keeps a playback device's latch buffer full over an unreliable serial
//! link.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ─connect─► Initializing ─first status─► Transferring
//!      ▲                                                    │ finish
//!      │                                                    ▼
//!      └──underrun── EmptyingDevice ◄──queue drained── EmptyingHost
//! ```
//!
//! A fatal device error in any other state tears the session down with an
//! error. Recoverable errors rewind to the device's stream position and
//! resend from the resend window.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut streamer = LatchStreamer::new(StreamOptions::from_config(&config))?;
//! let mut exhausted = fill_queue(&mut streamer, &mut source, priming, &pump)?;
//! streamer.connect(bootloader, &firmware, ProgressReporter::new(period))?;
//! stream_loop(&mut streamer, &mut source, &pump, exhausted)?;
//! ```

pub mod bootstrap;
pub mod error;
pub mod events;
pub mod link;
pub mod options;
pub mod pump;
pub mod queue;
pub mod reporter;
pub mod resend;
pub mod serial_bootloader;
pub mod streamer;

pub use bootstrap::{run_bootstrap, Bootloader, FirmwareBuilder};
pub use error::{BootError, BootResult, LinkError, StreamError, StreamResult};
pub use events::{
    BootstrapStage, ConnectionState, NullObserver, StatusReport, StreamEvent, StreamObserver,
};
pub use link::SerialLink;
#[cfg(feature = "serial")]
pub use link::SerialPortLink;
pub use options::StreamOptions;
pub use pump::{fill_queue, refill, stream_loop, top_up, LatchSource, MemorySource, PumpSettings};
pub use reporter::ProgressReporter;
pub use serial_bootloader::{BootloaderSettings, SerialBootloader};
pub use streamer::{latches_in_transit, LatchStreamer, StepOutcome};
