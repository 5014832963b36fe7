//! Reefnet Sensus Ultra dive logger
//!
//! The logger sends its handshake packet as soon as a connection is made.
//! Before accepting each byte from the host it sends a prompt byte
//! (`0xA5`); commands are 16 bit little endian values sent byte by byte.
//! Every reply packet ends with a CRC-16/CCITT of its payload.
//!
//! Dump conversion runs dive and sample extraction on worker threads
//! through the extraction bridge, one bridge per dive for the samples.

pub mod parser;

use abyss_core::dive::RawDive;
use abyss_core::uddf::DeviceDump;
use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::bridge::{BridgeConfig, Extraction};
use crate::device::{DeviceDriver, MemoryDump};
use crate::format::{DumpFormat, FormatError, RawDives};
use crate::transport::{DeviceError, SerialSettings, SerialTransport, Transport};
use parser::{DiveHeader, Handshake, SampleAccumulator};

const PROMPT: u8 = 0xa5;
const ACCEPT: u8 = PROMPT;

const CMD_READ_DATA: u16 = 0xb421;
const CMD_READ_USER: u16 = 0xb420;
const CMD_SENSE: u16 = 0xb440;

/// Payload size of a data memory packet
pub const PACKET_SIZE: usize = 512;
/// Packet number preceding a data memory packet payload
const PACKET_HEADER_SIZE: usize = 2;

/// Sensus Ultra connection
pub struct SensusUltraDriver<T: Transport> {
    transport: T,
    handshake: Vec<u8>,
}

impl<T: Transport> SensusUltraDriver<T> {
    /// Take over a connection and receive the handshake packet
    pub fn open(mut transport: T) -> Result<Self, DeviceError> {
        let handshake = read_packet(&mut transport, parser::HANDSHAKE_SIZE, 0)?;
        debug!(size = handshake.len(), "Received Sensus Ultra handshake");
        Ok(Self {
            transport,
            handshake,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Raw handshake packet
    pub fn handshake(&self) -> &[u8] {
        &self.handshake
    }

    fn send_byte(&mut self, value: u8) -> Result<(), DeviceError> {
        let prompt = self.transport.read(1)?;
        if prompt[0] != PROMPT {
            return Err(DeviceError::Protocol(format!(
                "unexpected prompt byte {:#04x}",
                prompt[0]
            )));
        }
        self.transport.write(&[value])
    }

    fn send_command(&mut self, cmd: u16) -> Result<(), DeviceError> {
        debug!(cmd = cmd, "Sending command");
        for b in cmd.to_le_bytes() {
            self.send_byte(b)?;
        }
        Ok(())
    }

    /// Read the sensor values
    pub fn sense(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.send_command(CMD_SENSE)?;
        read_packet(&mut self.transport, parser::SENSE_SIZE, 0)
    }

    /// Read the user memory
    pub fn read_user(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.send_command(CMD_READ_USER)?;
        read_packet(&mut self.transport, parser::USER_SIZE, 0)
    }

    /// Read the data memory, packet by packet
    pub fn read_data(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.send_command(CMD_READ_DATA)?;

        let count = parser::DATA_SIZE / PACKET_SIZE;
        let mut data = Vec::with_capacity(parser::DATA_SIZE);
        for n in 0..count {
            let packet = read_packet(&mut self.transport, PACKET_SIZE, PACKET_HEADER_SIZE)?;
            let number = usize::from(u16::from_le_bytes([packet[0], packet[1]]));
            if number != n {
                return Err(DeviceError::Protocol(format!(
                    "expected packet {}, got {}",
                    n, number
                )));
            }
            data.extend_from_slice(&packet[PACKET_HEADER_SIZE..]);
            self.send_byte(ACCEPT)?;
        }

        debug!(size = data.len(), packets = count, "Read Sensus Ultra data memory");
        Ok(data)
    }
}

/// Read a packet of `header` + `size` bytes followed by a checksum of the
/// `size` payload bytes; returns the packet without the checksum
fn read_packet<T: Transport>(
    transport: &mut T,
    size: usize,
    header: usize,
) -> Result<Vec<u8>, DeviceError> {
    let mut packet = transport.read(header + size + 2)?;
    let crc = packet.split_off(header + size);
    let expected = u16::from_le_bytes([crc[0], crc[1]]);
    let actual = parser::crc_ccitt(&packet[header..]);
    if expected != actual {
        return Err(DeviceError::Checksum { expected, actual });
    }
    Ok(packet)
}

impl SensusUltraDriver<SerialTransport> {
    /// Connect to a Sensus Ultra on a serial port
    ///
    /// Yields nothing when the port cannot be opened or no handshake
    /// arrives.
    pub fn scan(port: &str, settings: &SerialSettings) -> impl Iterator<Item = Self> {
        let settings = SerialSettings {
            baud_rate: 115200,
            ..settings.clone()
        };
        let driver = match SerialTransport::open(port, &settings).and_then(Self::open) {
            Ok(driver) => {
                debug!(port = %port, "Connected Sensus Ultra");
                Some(driver)
            }
            Err(e) => {
                debug!(port = %port, error = %e, "No Sensus Ultra found");
                None
            }
        };
        driver.into_iter()
    }
}

impl<T: Transport> DeviceDriver for SensusUltraDriver<T> {
    fn version(&mut self) -> Result<String, DeviceError> {
        self.sense()?;
        let handshake =
            Handshake::parse(&self.handshake).map_err(|e| DeviceError::Protocol(e.to_string()))?;
        Ok(handshake.version())
    }
}

/// Sensus Ultra memory download
pub struct SensusUltraMemoryDump<T: Transport> {
    driver: SensusUltraDriver<T>,
}

impl<T: Transport> SensusUltraMemoryDump<T> {
    pub fn new(driver: SensusUltraDriver<T>) -> Self {
        Self { driver }
    }
}

impl<T: Transport> MemoryDump for SensusUltraMemoryDump<T> {
    /// Handshake packet, user memory and data memory
    fn dump(&mut self) -> Result<Vec<u8>, DeviceError> {
        let user = self.driver.read_user()?;
        let data = self.driver.read_data()?;

        let mut image = Vec::with_capacity(parser::DUMP_SIZE);
        image.extend_from_slice(&self.driver.handshake);
        image.extend_from_slice(&user);
        image.extend_from_slice(&data);
        Ok(image)
    }
}

/// Dive bytes handed from the dive extraction worker
#[derive(Debug)]
struct DiveRecord {
    data: Vec<u8>,
    fingerprint: [u8; 4],
}

/// Sensus Ultra memory image format
#[derive(Debug, Clone, Copy, Default)]
pub struct SensusUltraFormat {
    pub bridge: BridgeConfig,
}

impl SensusUltraFormat {
    pub fn new(bridge: BridgeConfig) -> Self {
        Self { bridge }
    }
}

/// Build a raw dive, extracting its samples on a worker thread
fn raw_dive(
    record: DiveRecord,
    boot_time: NaiveDateTime,
    bridge: BridgeConfig,
) -> Result<RawDive, FormatError> {
    let header = DiveHeader::parse(&record.data)?;
    let interval = u32::from(header.interval);
    // one interval earlier, leaving room for the surface sample
    let start = boot_time + Duration::seconds(i64::from(header.time))
        - Duration::seconds(i64::from(interval));
    debug!(
        start = %start,
        fingerprint = ?record.fingerprint,
        ?header,
        "Parsing Sensus Ultra dive"
    );

    let data = record.data;
    let samples = Extraction::spawn("su-samples", bridge, move |producer| {
        let mut acc = SampleAccumulator::new(interval);
        parser::samples_foreach(&data, |event| match acc.push(event) {
            Some(sample) => producer.put(sample),
            None => Ok(()),
        })
    })?
    .collect::<Result<Vec<_>, _>>()?;

    Ok(RawDive {
        start,
        interval,
        endcount: usize::from(header.endcount),
        samples,
    })
}

impl DumpFormat for SensusUltraFormat {
    fn model(&self, data: &[u8]) -> Result<String, FormatError> {
        Ok(Handshake::parse(data)?.version())
    }

    fn raw_dives<'a>(&'a self, dump: &'a DeviceDump) -> Result<RawDives<'a>, FormatError> {
        let (handshake, _, memory) = parser::split(&dump.data)?;
        let handshake = Handshake::parse(handshake)?;
        // device clock counts seconds since boot
        let boot_time = dump.time - Duration::seconds(i64::from(handshake.time));
        debug!(boot_time = %boot_time, serial = handshake.serial, "Decoding Sensus Ultra data memory");

        let memory = memory.to_vec();
        let dives = Extraction::spawn("su-dives", self.bridge, move |producer| {
            parser::extract_dives(&memory, |dive, fingerprint| {
                let mut fp = [0u8; 4];
                fp.copy_from_slice(fingerprint);
                producer.put(DiveRecord {
                    data: dive.to_vec(),
                    fingerprint: fp,
                })?;
                Ok(true)
            })
        })?;

        let bridge = self.bridge;
        let dives = dives.map(move |record| -> Result<RawDive, FormatError> {
            raw_dive(record?, boot_time, bridge)
        });
        Ok(Box::new(dives))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn with_crc(payload: &[u8]) -> Vec<u8> {
        let mut p = payload.to_vec();
        p.extend(parser::crc_ccitt(payload).to_le_bytes());
        p
    }

    fn handshake() -> Vec<u8> {
        let mut h = vec![2u8, 1];
        h.extend(815u16.to_le_bytes());
        h.extend(3600u32.to_le_bytes());
        h.resize(parser::HANDSHAKE_SIZE, 0);
        with_crc(&h)
    }

    #[test]
    fn test_open_and_version() {
        let mut t = MockTransport::new(handshake());
        t.push(&[PROMPT, PROMPT]);
        t.push(&with_crc(&[1, 2, 3, 4, 5, 6]));

        let mut drv = SensusUltraDriver::open(t).unwrap();
        assert_eq!(drv.version().unwrap(), "Sensus Ultra 1.2");
        assert_eq!(drv.transport().written(), &[0x40, 0xb4]);
    }

    #[test]
    fn test_handshake_checksum() {
        let mut h = handshake();
        h[3] ^= 0xff;
        let err = SensusUltraDriver::open(MockTransport::new(h)).err().unwrap();
        assert!(matches!(err, DeviceError::Checksum { .. }));
    }

    #[test]
    fn test_unexpected_prompt() {
        let mut t = MockTransport::new(handshake());
        t.push(&[0x00]);
        let mut drv = SensusUltraDriver::open(t).unwrap();
        assert!(matches!(drv.sense(), Err(DeviceError::Protocol(_))));
    }

    #[test]
    fn test_dump_image() {
        let mut t = MockTransport::new(handshake());
        let user = vec![0x11u8; parser::USER_SIZE];
        t.push(&[PROMPT, PROMPT]);
        t.push(&with_crc(&user));

        t.push(&[PROMPT, PROMPT]);
        let count = parser::DATA_SIZE / PACKET_SIZE;
        for n in 0..count {
            let payload = vec![(n % 251) as u8; PACKET_SIZE];
            t.push(&(n as u16).to_le_bytes());
            t.push(&with_crc(&payload));
            t.push(&[PROMPT]);
        }

        let mut md = SensusUltraMemoryDump::new(SensusUltraDriver::open(t).unwrap());
        let image = md.dump().unwrap();

        assert_eq!(image.len(), parser::DUMP_SIZE);
        assert_eq!(&image[..parser::HANDSHAKE_SIZE], &handshake()[..parser::HANDSHAKE_SIZE]);
        assert_eq!(image[parser::HANDSHAKE_SIZE], 0x11);
        let data = &image[parser::HANDSHAKE_SIZE + parser::USER_SIZE..];
        assert_eq!(data[PACKET_SIZE * 3], 3);

        let written = md.driver.transport().written();
        assert_eq!(&written[..4], &[0x20, 0xb4, 0x21, 0xb4]);
        assert_eq!(written.len(), 4 + count);
    }

    #[test]
    fn test_packet_out_of_order() {
        let mut t = MockTransport::new(handshake());
        t.push(&[PROMPT, PROMPT]);
        t.push(&1u16.to_le_bytes());
        t.push(&with_crc(&[0u8; PACKET_SIZE]));

        let mut drv = SensusUltraDriver::open(t).unwrap();
        assert!(matches!(drv.read_data(), Err(DeviceError::Protocol(_))));
    }
}
