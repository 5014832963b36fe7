//! Blocking byte transports for dive computers
//!
//! Dive computer protocols are request/response with fixed size replies, so
//! a [`Transport`] only offers a full-buffer write and a read of exactly `n`
//! bytes. A read returning fewer bytes before the channel timeout is an
//! error, never a partial success.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Default timeout of a serial read, long enough for slow dump commands
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device communication error: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("Cannot open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("Extraction stalled: consumer did not take data in time")]
    Stalled,
}

/// Byte oriented duplex channel to a device
pub trait Transport {
    /// Write the whole buffer
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Read exactly `n` bytes
    fn read(&mut self, n: usize) -> Result<Vec<u8>, DeviceError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        (**self).write(data)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, DeviceError> {
        (**self).read(n)
    }
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Serial port transport, 8 data bits, no parity, one stop bit
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open a serial port
    pub fn open(port: &str, settings: &SerialSettings) -> Result<Self, DeviceError> {
        let handle = serialport::new(port, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|source| DeviceError::Open {
                port: port.to_string(),
                source,
            })?;

        debug!(
            port = %port,
            baud_rate = settings.baud_rate,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Opened serial port"
        );

        Ok(Self {
            port: handle,
            name: port.to_string(),
        })
    }

    /// Port name as given when opening
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        trace!(port = %self.name, size = data.len(), "Sending data");
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, DeviceError> {
        trace!(port = %self.name, size = n, "Reading data");
        let mut buf = vec![0u8; n];
        let mut got = 0;
        while got < n {
            match self.port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(len) => got += len,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        debug!(port = %self.name, expected = n, got = got, "Read finished");

        if got != n {
            return Err(DeviceError::ShortRead { expected: n, got });
        }
        Ok(buf)
    }
}

/// In-memory transport replaying scripted device output
///
/// Every byte written is recorded; reads consume the scripted input and
/// fail with a short read once it runs out.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    input: VecDeque<u8>,
    written: Vec<u8>,
}

impl MockTransport {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into().into(),
            written: Vec::new(),
        }
    }

    /// Append more scripted device output
    pub fn push(&mut self, data: &[u8]) {
        self.input.extend(data);
    }

    /// All bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Scripted bytes not read yet
    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, DeviceError> {
        if self.input.len() < n {
            let got = self.input.len();
            self.input.clear();
            return Err(DeviceError::ShortRead { expected: n, got });
        }
        Ok(self.input.drain(..n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_exact_reads() {
        let mut t = MockTransport::new(b"\x01\x50abc".to_vec());
        assert_eq!(t.read(2).unwrap(), vec![1, 0x50]);
        assert_eq!(t.read(3).unwrap(), b"abc");
        assert_eq!(t.remaining(), 0);
    }

    #[test]
    fn test_mock_short_read_fails() {
        let mut t = MockTransport::new(vec![0u8; 10]);
        let err = t.read(16).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::ShortRead {
                expected: 16,
                got: 10
            }
        ));
    }

    #[test]
    fn test_mock_records_writes() {
        let mut t = MockTransport::default();
        t.write(b"e").unwrap();
        t.write(&[0x00]).unwrap();
        assert_eq!(t.written(), b"e\x00");
    }

    #[test]
    fn test_open_missing_port() {
        let err = SerialTransport::open("/dev/abyss-no-such-port", &SerialSettings::default());
        assert!(matches!(err, Err(DeviceError::Open { .. })));
    }
}
