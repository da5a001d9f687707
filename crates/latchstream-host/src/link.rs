// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Byte transport between the host and the device.

use std::time::Duration;

use crate::error::LinkError;

/// Non-blocking byte link to the device
///
/// Both calls return promptly: `read` yields whatever has arrived (possibly
/// nothing) and `write` may accept only part of the data.
pub trait SerialLink {
    /// Read available bytes into `buf`, returning how many were read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Write as much of `data` as the link will take, returning how much
    fn write(&mut self, data: &[u8]) -> Result<usize, LinkError>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    /// Throw away anything buffered in either direction
    fn clear_buffers(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    /// Bound how long a read waits for the first byte
    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), LinkError> {
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use serial_port::SerialPortLink;

#[cfg(feature = "serial")]
mod serial_port {
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use tracing::info;

    use super::SerialLink;
    use crate::error::LinkError;

    /// [`SerialLink`] over an operating system serial port
    pub struct SerialPortLink {
        port: Box<dyn SerialPort>,
    }

    impl SerialPortLink {
        /// Open `path` at `baud_rate`, 8N1, no flow control
        ///
        /// `timeout` bounds how long a read waits for the first byte.
        pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, LinkError> {
            let port = serialport::new(path, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()?;
            info!(path, baud_rate, "opened serial port");
            Ok(Self { port })
        }

        /// Wrap an already opened port
        pub fn from_port(port: Box<dyn SerialPort>) -> Self {
            Self { port }
        }
    }

    impl SerialLink for SerialPortLink {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
            match self.port.write(data) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        }

        fn flush(&mut self) -> Result<(), LinkError> {
            self.port.flush()?;
            Ok(())
        }

        fn clear_buffers(&mut self) -> Result<(), LinkError> {
            self.port.clear(serialport::ClearBuffer::All)?;
            Ok(())
        }

        fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), LinkError> {
            self.port.set_timeout(timeout)?;
            Ok(())
        }
    }
}
