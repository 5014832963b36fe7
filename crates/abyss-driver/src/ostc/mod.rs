//! OSTC, an open source dive computer
//!
//! Single byte commands over a 115200 8N1 serial line:
//! - `e` - firmware version (2 bytes) and fingerprint (16 bytes)
//! - `a` - complete memory image
//! - `c` - enter dive simulation; each following byte is a pressure,
//!   `0x00` leaves simulation

pub mod parser;

use abyss_core::uddf::DeviceDump;
use tracing::debug;

use crate::device::{DeviceDriver, MemoryDump, Simulator};
use crate::format::{DumpFormat, FormatError, RawDives};
use crate::transport::{DeviceError, SerialSettings, SerialTransport, Transport};

const CMD_VERSION: u8 = b'e';
const CMD_DUMP: u8 = b'a';
const CMD_SIMULATION_START: u8 = b'c';
const CMD_SIMULATION_STOP: u8 = 0x00;

const FINGERPRINT_SIZE: usize = 16;

/// Pressure byte sent to the device in simulation mode for a depth
pub fn pressure(depth: f64) -> u8 {
    (depth + 10.0).clamp(0.0, 255.0) as u8
}

/// OSTC dive computer connection
pub struct OstcDriver<T: Transport> {
    transport: T,
}

impl<T: Transport> OstcDriver<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn command(&mut self, cmd: u8) -> Result<(), DeviceError> {
        debug!(cmd = cmd, "Sending command");
        self.transport.write(&[cmd])
    }
}

impl OstcDriver<SerialTransport> {
    /// Connect to an OSTC on a serial port
    ///
    /// Yields nothing when the port cannot be opened.
    pub fn scan(port: &str, settings: &SerialSettings) -> impl Iterator<Item = Self> {
        let settings = SerialSettings {
            baud_rate: 115200,
            ..settings.clone()
        };
        let driver = match SerialTransport::open(port, &settings) {
            Ok(transport) => {
                debug!(port = %port, "Connected OSTC");
                Some(Self::new(transport))
            }
            Err(e) => {
                debug!(port = %port, error = %e, "No OSTC found");
                None
            }
        };
        driver.into_iter()
    }
}

impl<T: Transport> DeviceDriver for OstcDriver<T> {
    fn version(&mut self) -> Result<String, DeviceError> {
        self.command(CMD_VERSION)?;
        let v = self.transport.read(2)?;
        // may be all zeros if not built yet
        self.transport.read(FINGERPRINT_SIZE)?;
        Ok(format!("OSTC {}.{}", v[0], v[1]))
    }
}

/// OSTC dive simulation
///
/// The device shows the dive screen only after reaching the configured
/// start depth and stays in dive mode for a while after stopping.
pub struct OstcSimulator<T: Transport> {
    driver: OstcDriver<T>,
}

impl<T: Transport> OstcSimulator<T> {
    pub fn new(driver: OstcDriver<T>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &OstcDriver<T> {
        &self.driver
    }
}

impl<T: Transport> Simulator for OstcSimulator<T> {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.driver.command(CMD_SIMULATION_START)
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.driver.command(CMD_SIMULATION_STOP)
    }

    fn depth(&mut self, depth: f64) -> Result<(), DeviceError> {
        self.driver.transport.write(&[pressure(depth.round())])
    }
}

/// OSTC memory download
pub struct OstcMemoryDump<T: Transport> {
    driver: OstcDriver<T>,
}

impl<T: Transport> OstcMemoryDump<T> {
    pub fn new(driver: OstcDriver<T>) -> Self {
        Self { driver }
    }
}

impl<T: Transport> MemoryDump for OstcMemoryDump<T> {
    fn dump(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.driver.command(CMD_DUMP)?;
        self.driver.transport.read(parser::DUMP_SIZE)
    }
}

/// OSTC memory image format
#[derive(Debug, Clone, Copy, Default)]
pub struct OstcFormat;

impl DumpFormat for OstcFormat {
    fn model(&self, data: &[u8]) -> Result<String, FormatError> {
        Ok(parser::status(data)?.version())
    }

    fn raw_dives<'a>(&'a self, dump: &'a DeviceDump) -> Result<RawDives<'a>, FormatError> {
        let status = parser::status(&dump.data)?;
        debug!(
            serial = status.serial,
            dive_count = status.dive_count,
            "Decoding OSTC profile memory"
        );
        let dives = parser::profiles(status.profiles)
            .map(|(header, profile)| parser::dive(header, profile).map_err(FormatError::from));
        Ok(Box::new(dives))
    }
}
