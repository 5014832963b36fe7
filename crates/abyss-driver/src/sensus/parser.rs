//! Sensus Ultra memory layout and dive extraction
//!
//! A dump image is the handshake packet, the user memory and the data
//! memory, concatenated. Dives in data memory start with a 16 byte header
//! beginning with `00 00 00 00`, followed by 4 byte samples (temperature in
//! 0.01 K, absolute pressure in mbar) and a `FF FF FF FF` stop marker.

use abyss_core::dive::RawSample;
use abyss_core::units::mbar_to_depth;
use crc::{Crc, CRC_16_IBM_3740};
use std::mem;
use tracing::{debug, trace};

use crate::format::FormatError;
use crate::transport::DeviceError;

pub const HANDSHAKE_SIZE: usize = 24;
pub const USER_SIZE: usize = 16384;
pub const DATA_SIZE: usize = 2080768;
pub const SENSE_SIZE: usize = 6;

/// Size of a complete dump image
pub const DUMP_SIZE: usize = HANDSHAKE_SIZE + USER_SIZE + DATA_SIZE;

pub const DIVE_HEADER_SIZE: usize = 16;
const SAMPLE_SIZE: usize = 4;
const START_MARKER: [u8; 4] = [0x00; 4];
const STOP_MARKER: [u8; 4] = [0xff; 4];

/// Temperature offset of samples, 0 C in 0.01 K
const SAMPLE_ZERO_CELSIUS: f64 = 27315.0;

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// CRC-16/CCITT (polynomial 0x1021, initial value 0xFFFF)
const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Checksum of a packet payload
pub fn crc_ccitt(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

/// Handshake packet sent by the device when a connection is made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub ver1: u8,
    pub ver2: u8,
    pub serial: u16,
    /// Device clock, seconds since boot
    pub time: u32,
}

impl Handshake {
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < 8 {
            return Err(FormatError::TooShort {
                expected: HANDSHAKE_SIZE,
                got: data.len(),
            });
        }
        Ok(Self {
            ver1: data[0],
            ver2: data[1],
            serial: u16_at(data, 2),
            time: u32_at(data, 4),
        })
    }

    /// Model and firmware version, e.g. `Sensus Ultra 1.2`
    pub fn version(&self) -> String {
        format!("Sensus Ultra {}.{}", self.ver2, self.ver1)
    }
}

/// Split a dump image into handshake, user memory and data memory
pub fn split(data: &[u8]) -> Result<(&[u8], &[u8], &[u8]), FormatError> {
    if data.len() < DUMP_SIZE {
        return Err(FormatError::TooShort {
            expected: DUMP_SIZE,
            got: data.len(),
        });
    }
    let (handshake, rest) = data.split_at(HANDSHAKE_SIZE);
    let (user, rest) = rest.split_at(USER_SIZE);
    Ok((handshake, user, &rest[..DATA_SIZE]))
}

/// Dive header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiveHeader {
    /// Device clock at dive start, seconds since boot
    pub time: u32,
    /// Sampling interval in seconds
    pub interval: u16,
    /// Dive start depth threshold
    pub threshold: u16,
    /// Number of samples logged after surfacing
    pub endcount: u16,
    pub averaging: u16,
}

impl DiveHeader {
    pub fn parse(dive: &[u8]) -> Result<Self, DeviceError> {
        if dive.len() < DIVE_HEADER_SIZE {
            return Err(DeviceError::Extraction(format!(
                "dive record too short: {} bytes",
                dive.len()
            )));
        }
        Ok(Self {
            time: u32_at(dive, 4),
            interval: u16_at(dive, 8),
            threshold: u16_at(dive, 10),
            endcount: u16_at(dive, 12),
            averaging: u16_at(dive, 14),
        })
    }
}

/// Find dives in data memory, newest first
///
/// The callback receives the dive bytes (header, samples and stop marker)
/// and the fingerprint (device time of the dive). It returns `false` to
/// stop the extraction. A dive without stop marker fails the extraction.
pub fn extract_dives<F>(data: &[u8], mut callback: F) -> Result<(), DeviceError>
where
    F: FnMut(&[u8], &[u8]) -> Result<bool, DeviceError>,
{
    let mut previous = data.len();
    let mut current = data.len().saturating_sub(START_MARKER.len());

    while current > 0 {
        current -= 1;
        if data[current..current + START_MARKER.len()] != START_MARKER {
            continue;
        }

        let mut offset = current + DIVE_HEADER_SIZE;
        while offset + STOP_MARKER.len() <= previous
            && data[offset..offset + STOP_MARKER.len()] != STOP_MARKER
        {
            offset += SAMPLE_SIZE;
        }
        if offset + STOP_MARKER.len() > previous {
            return Err(DeviceError::Extraction(format!(
                "no end of dive starting at {:#x}",
                current
            )));
        }

        let dive = &data[current..offset + STOP_MARKER.len()];
        trace!(offset = current, size = dive.len(), "Found dive");
        if !callback(dive, &dive[4..8])? {
            debug!("Dive extraction stopped by callback");
            return Ok(());
        }

        previous = current;
        current = current.saturating_sub(START_MARKER.len());
    }
    Ok(())
}

/// Sample field reported by [`samples_foreach`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleEvent {
    /// Seconds since the first logged sample minus one interval
    Time(u32),
    /// Temperature in Celsius
    Temperature(f64),
    /// Depth in meters, always the last field of a sample
    Depth(f64),
}

/// Decode the samples of a dive, reporting each field in turn
pub fn samples_foreach<F>(dive: &[u8], mut callback: F) -> Result<(), DeviceError>
where
    F: FnMut(SampleEvent) -> Result<(), DeviceError>,
{
    let header = DiveHeader::parse(dive)?;
    let interval = u32::from(header.interval);
    let mut time = 0;
    let mut offset = DIVE_HEADER_SIZE;

    while offset + SAMPLE_SIZE <= dive.len() && dive[offset..offset + SAMPLE_SIZE] != STOP_MARKER {
        time += interval;
        callback(SampleEvent::Time(time))?;

        let temperature = f64::from(u16_at(dive, offset));
        callback(SampleEvent::Temperature(
            (temperature - SAMPLE_ZERO_CELSIUS) / 100.0,
        ))?;

        let pressure = f64::from(u16_at(dive, offset + 2));
        callback(SampleEvent::Depth(mbar_to_depth(pressure)))?;

        offset += SAMPLE_SIZE;
    }
    Ok(())
}

/// Builds samples out of field events
///
/// A sample is complete when its depth arrives; it is then handed out and
/// a fresh one is started.
#[derive(Debug, Default)]
pub struct SampleAccumulator {
    time_offset: u32,
    current: RawSample,
}

impl SampleAccumulator {
    /// Create an accumulator shifting sample times by `time_offset` seconds
    pub fn new(time_offset: u32) -> Self {
        Self {
            time_offset,
            current: RawSample::default(),
        }
    }

    pub fn push(&mut self, event: SampleEvent) -> Option<RawSample> {
        match event {
            SampleEvent::Time(t) => self.current.time = t + self.time_offset,
            SampleEvent::Temperature(t) => self.current.temperature = Some(t),
            SampleEvent::Depth(d) => {
                self.current.depth = d;
                return Some(mem::take(&mut self.current));
            }
        }
        None
    }
}
