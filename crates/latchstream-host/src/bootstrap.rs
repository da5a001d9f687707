// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Getting firmware (and the priming latches inside it) onto the device.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{BootError, BootResult};
use crate::events::{BootstrapStage, StreamEvent, StreamObserver};
use crate::link::SerialLink;

/// A bootloader the host can download firmware through
///
/// Starting execution consumes the bootloader and hands back the link the
/// running firmware streams over.
pub trait Bootloader {
    /// Link to the running firmware
    type Link: SerialLink + 'static;

    /// Establish contact; `None` waits indefinitely
    ///
    /// Must fail with [`BootError::Timeout`] if `timeout` elapses.
    fn connect(&mut self, timeout: Option<Duration>) -> BootResult<()>;

    /// Check the bootloader is one we can talk to, returning its version
    fn identify(&mut self) -> BootResult<u16>;

    /// Write `words` starting at `address`
    fn write_memory(&mut self, address: u16, words: &[u16]) -> BootResult<()>;

    /// Read `length` words starting at `address`
    fn read_memory(&mut self, address: u16, length: usize) -> BootResult<Vec<u16>>;

    /// Jump to `address`
    fn start_execution(self, address: u16) -> BootResult<Self::Link>;
}

/// Builds the firmware image that carries the priming latches
pub trait FirmwareBuilder {
    /// Produce the image words for `priming` (whole `record_width` records)
    fn build(&self, priming: &[u16], record_width: usize) -> BootResult<Vec<u16>>;
}

impl<F> FirmwareBuilder for F
where
    F: Fn(&[u16], usize) -> BootResult<Vec<u16>>,
{
    fn build(&self, priming: &[u16], record_width: usize) -> BootResult<Vec<u16>> {
        self(priming, record_width)
    }
}

/// Connect, identify, download, verify and start
///
/// On a connect timeout the observer is told to reset the target and the
/// connection is retried without a timeout.
pub fn run_bootstrap<B, F>(
    mut bootloader: B,
    firmware: &F,
    priming: &[u16],
    record_width: usize,
    load_address: u16,
    connect_timeout: Duration,
    observer: &mut dyn StreamObserver,
) -> BootResult<B::Link>
where
    B: Bootloader,
    F: FirmwareBuilder + ?Sized,
{
    observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::Connecting));
    match bootloader.connect(Some(connect_timeout)) {
        Ok(()) => {}
        Err(BootError::Timeout(reason)) => {
            warn!(%reason, "bootloader did not answer, waiting for a reset");
            observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::ResetRequested));
            bootloader.connect(None)?;
        }
        Err(e) => return Err(e),
    }

    let version = bootloader.identify()?;
    info!(version, "bootloader identified");
    observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::Identified { version }));

    let priming_latches = priming.len() / record_width.max(1);
    observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::BuildingFirmware {
        priming_latches,
    }));
    let image = firmware.build(priming, record_width)?;

    observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::Downloading {
        words: image.len(),
    }));
    bootloader.write_memory(load_address, &image)?;
    let read_back = bootloader.read_memory(load_address, image.len())?;
    if let Some(offset) = image.iter().zip(&read_back).position(|(a, b)| a != b) {
        return Err(BootError::VerificationFailed { offset });
    }
    if read_back.len() != image.len() {
        return Err(BootError::VerificationFailed {
            offset: read_back.len().min(image.len()),
        });
    }
    debug!(words = image.len(), "firmware verified");

    let link = bootloader.start_execution(load_address)?;
    info!(priming_latches, "firmware started");
    observer.on_event(&StreamEvent::Bootstrap(BootstrapStage::Started));
    Ok(link)
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted bootloader and link for streamer tests

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;
    use crate::error::LinkError;

    /// Byte queues shared between a test and the link it handed out
    #[derive(Debug, Default)]
    pub struct Wire {
        pub to_host: VecDeque<u8>,
        pub from_host: Vec<u8>,
        /// Bytes accepted per write call; `None` takes everything
        pub write_limit: Option<usize>,
        pub writes: usize,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockLink(pub Rc<RefCell<Wire>>);

    impl SerialLink for MockLink {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
            let mut wire = self.0.borrow_mut();
            let n = buf.len().min(wire.to_host.len());
            for (slot, byte) in buf.iter_mut().zip(wire.to_host.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
            let mut wire = self.0.borrow_mut();
            let n = wire.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
            wire.from_host.extend_from_slice(&data[..n]);
            wire.writes += 1;
            Ok(n)
        }
    }

    /// Bootloader with in-memory "flash"
    #[derive(Debug, Default)]
    pub struct MockBootloader {
        pub link: MockLink,
        pub memory: Vec<u16>,
        pub timeouts_before_answer: usize,
        pub connect_calls: Vec<Option<Duration>>,
        pub corrupt_read_back: bool,
        pub started_at: Rc<RefCell<Option<u16>>>,
    }

    impl Bootloader for MockBootloader {
        type Link = MockLink;

        fn connect(&mut self, timeout: Option<Duration>) -> BootResult<()> {
            self.connect_calls.push(timeout);
            if timeout.is_some() && self.timeouts_before_answer > 0 {
                self.timeouts_before_answer -= 1;
                return Err(BootError::Timeout("hello".into()));
            }
            Ok(())
        }

        fn identify(&mut self) -> BootResult<u16> {
            Ok(3)
        }

        fn write_memory(&mut self, address: u16, words: &[u16]) -> BootResult<()> {
            let start = usize::from(address);
            if self.memory.len() < start + words.len() {
                self.memory.resize(start + words.len(), 0);
            }
            self.memory[start..start + words.len()].copy_from_slice(words);
            Ok(())
        }

        fn read_memory(&mut self, address: u16, length: usize) -> BootResult<Vec<u16>> {
            let start = usize::from(address);
            let mut words = self.memory[start..start + length].to_vec();
            if self.corrupt_read_back {
                if let Some(last) = words.last_mut() {
                    *last ^= 1;
                }
            }
            Ok(words)
        }

        fn start_execution(self, address: u16) -> BootResult<MockLink> {
            *self.started_at.borrow_mut() = Some(address);
            Ok(self.link)
        }
    }

    /// Image is just the priming words
    pub fn passthrough_firmware(priming: &[u16], _record_width: usize) -> BootResult<Vec<u16>> {
        Ok(priming.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::events::NullObserver;

    #[test]
    fn test_bootstrap_writes_verifies_and_starts() {
        let bootloader = MockBootloader::default();
        let started = bootloader.started_at.clone();
        let mut events = Vec::new();
        let mut observer = |event: &StreamEvent| events.push(event.clone());

        let result = run_bootstrap(
            bootloader,
            &passthrough_firmware,
            &[1, 2, 3],
            1,
            0,
            Duration::from_millis(10),
            &mut observer,
        );
        assert!(result.is_ok());
        assert_eq!(*started.borrow(), Some(0));
        assert_eq!(
            events.first(),
            Some(&StreamEvent::Bootstrap(BootstrapStage::Connecting))
        );
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Bootstrap(BootstrapStage::Started))
        );
        assert!(!events.contains(&StreamEvent::Bootstrap(BootstrapStage::ResetRequested)));
    }

    #[test]
    fn test_bootstrap_retries_without_timeout() {
        let bootloader = MockBootloader {
            timeouts_before_answer: 1,
            ..MockBootloader::default()
        };
        let mut events = Vec::new();
        let mut observer = |event: &StreamEvent| events.push(event.clone());

        let link = run_bootstrap(
            bootloader,
            &passthrough_firmware,
            &[1],
            1,
            0,
            Duration::from_millis(10),
            &mut observer,
        );
        assert!(link.is_ok());
        assert!(events.contains(&StreamEvent::Bootstrap(BootstrapStage::ResetRequested)));
    }

    #[test]
    fn test_bootstrap_verification_failure() {
        let bootloader = MockBootloader {
            corrupt_read_back: true,
            ..MockBootloader::default()
        };
        let started = bootloader.started_at.clone();
        let result = run_bootstrap(
            bootloader,
            &passthrough_firmware,
            &[1, 2, 3, 4],
            2,
            0,
            Duration::from_millis(10),
            &mut NullObserver,
        );
        assert!(matches!(
            result,
            Err(BootError::VerificationFailed { offset: 3 })
        ));
        assert_eq!(*started.borrow(), None);
    }
}
