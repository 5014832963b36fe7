//! OSTC memory image layout
//!
//! The image returned by the `a` command:
//!
//! | offset | size  | content                                        |
//! |--------|-------|------------------------------------------------|
//! | 0      | 6     | preamble, `AA AA AA AA 55 ..`                  |
//! | 6      | 256   | EEPROM: serial (u16), dive count (u16), config |
//! | 262    | 2     | battery voltage                                |
//! | 264    | 2     | firmware version major, minor                  |
//! | 266    | 32768 | profile ring memory                            |
//!
//! Each dive in profile memory is a 47 byte header framed by `FA FA` and
//! `FB FB` followed by the profile samples and a `FD FD` end marker. All
//! multi-byte values are little endian.

use abyss_core::dive::{start_from_end, DiveError, RawDive, RawSample};
use chrono::NaiveDate;
use tracing::{trace, warn};

use crate::format::FormatError;

/// Size of the complete memory image
pub const DUMP_SIZE: usize = 33034;

pub const PROFILE_MEMORY_SIZE: usize = 32768;

/// Size of a dive header including its markers
pub const HEADER_SIZE: usize = 47;

const PREAMBLE: [u8; 5] = [0xaa, 0xaa, 0xaa, 0xaa, 0x55];
const PREAMBLE_SIZE: usize = 6;
const EEPROM_SIZE: usize = 256;
const EEPROM_START: usize = PREAMBLE_SIZE;
const VOLTAGE_START: usize = EEPROM_START + EEPROM_SIZE;
const PROFILE_START: usize = VOLTAGE_START + 4;

pub const DIVE_START: [u8; 2] = [0xfa, 0xfa];
pub const HEADER_END: [u8; 2] = [0xfb, 0xfb];
pub const DIVE_END: [u8; 2] = [0xfd, 0xfd];

/// Profile flag bit announcing an event byte
const FLAG_EVENT: u8 = 0x80;
/// Event bit announcing a manual gas mix (O2, He)
const EVENT_MANUAL_GAS: u8 = 0x10;
/// Event bit announcing a gas change
const EVENT_GAS_CHANGE: u8 = 0x20;

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Device status decoded from the start of an image
#[derive(Debug, Clone, PartialEq)]
pub struct Status<'a> {
    pub serial: u16,
    pub dive_count: u16,
    /// Battery voltage in mV
    pub voltage: u16,
    pub ver1: u8,
    pub ver2: u8,
    pub profiles: &'a [u8],
}

impl Status<'_> {
    /// Model name, derived from the serial number range
    pub fn model(&self) -> &'static str {
        match self.serial {
            s if s > 2047 => "OSTC N2",
            s if s > 300 => "OSTC Mk.2",
            _ => "OSTC",
        }
    }

    /// Model and firmware version, e.g. `OSTC Mk.2 1.80`
    pub fn version(&self) -> String {
        format!("{} {}.{}", self.model(), self.ver1, self.ver2)
    }
}

/// Decode the status part of an image
pub fn status(data: &[u8]) -> Result<Status<'_>, FormatError> {
    if data.len() < DUMP_SIZE {
        return Err(FormatError::TooShort {
            expected: DUMP_SIZE,
            got: data.len(),
        });
    }
    if data[..PREAMBLE.len()] != PREAMBLE {
        return Err(FormatError::InvalidPreamble);
    }

    Ok(Status {
        serial: u16_at(data, EEPROM_START),
        dive_count: u16_at(data, EEPROM_START + 2),
        voltage: u16_at(data, VOLTAGE_START),
        ver1: data[VOLTAGE_START + 2],
        ver2: data[VOLTAGE_START + 3],
        profiles: &data[PROFILE_START..PROFILE_START + PROFILE_MEMORY_SIZE],
    })
}

/// Iterator over `(header, profile)` pairs of profile memory
///
/// The header slice includes its markers, the profile slice excludes the
/// end marker.
pub struct Profiles<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Split profile memory into dive records
pub fn profiles(data: &[u8]) -> Profiles<'_> {
    Profiles { data, pos: 0 }
}

fn find(data: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|i| from + i)
}

impl<'a> Iterator for Profiles<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = find(self.data, DIVE_START, self.pos)?;
            let header_end = start + HEADER_SIZE;
            if self.data.get(header_end - 2..header_end) != Some(&HEADER_END[..]) {
                self.pos = start + 1;
                continue;
            }

            let Some(end) = find(self.data, DIVE_END, header_end) else {
                warn!(offset = start, "Dive profile without end marker");
                self.pos = self.data.len();
                return None;
            };

            trace!(offset = start, size = end + 2 - start, "Found dive record");
            self.pos = end + 2;
            return Some((&self.data[start..header_end], &self.data[header_end..end]));
        }
    }
}

/// Divisor of an extended information block
///
/// Low nibble is the divisor (block stored every n-th sample, 0 never),
/// high nibble the block size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divisor {
    pub divisor: u8,
    pub size: u8,
}

impl Divisor {
    fn from_byte(b: u8) -> Self {
        Self {
            divisor: b & 0x0f,
            size: b >> 4,
        }
    }

    /// Check if the block is stored with a sample, `n` counting from 1
    fn applies(&self, n: usize) -> bool {
        self.divisor != 0 && n % usize::from(self.divisor) == 0
    }
}

/// Extended information block kinds, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Temperature,
    Deco,
    Tank,
    Ppo2,
    DecoDebug,
    Cns,
}

/// Dive header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u8,
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    /// Maximum depth in cm
    pub max_depth: u16,
    pub dive_time_m: u16,
    pub dive_time_s: u8,
    /// Minimum temperature in 0.1 C
    pub min_temp: i16,
    /// Surface pressure in mbar
    pub surface_pressure: u16,
    pub desaturation: u16,
    pub gas: u8,
    pub firmware: (u8, u8),
    pub battery: u16,
    /// Sampling interval in seconds
    pub sampling: u8,
    pub temperature: Divisor,
    pub deco: Divisor,
    pub tank: Divisor,
    pub ppo2: Divisor,
    pub deco_debug: Divisor,
    pub cns: Divisor,
    pub salinity: u8,
    pub max_cns: u8,
}

/// Decode a dive header including its markers
pub fn header(data: &[u8]) -> Result<Header, DiveError> {
    if data.len() < HEADER_SIZE {
        return Err(DiveError::Truncated(data.len()));
    }

    Ok(Header {
        version: data[2],
        month: data[3],
        day: data[4],
        year: data[5],
        hour: data[6],
        minute: data[7],
        max_depth: u16_at(data, 8),
        dive_time_m: u16_at(data, 10),
        dive_time_s: data[12],
        min_temp: u16_at(data, 13) as i16,
        surface_pressure: u16_at(data, 15),
        desaturation: u16_at(data, 17),
        gas: data[31],
        firmware: (data[32], data[33]),
        battery: u16_at(data, 34),
        sampling: data[36],
        temperature: Divisor::from_byte(data[37]),
        deco: Divisor::from_byte(data[38]),
        tank: Divisor::from_byte(data[39]),
        ppo2: Divisor::from_byte(data[40]),
        deco_debug: Divisor::from_byte(data[41]),
        cns: Divisor::from_byte(data[42]),
        salinity: data[43],
        max_cns: data[44],
    })
}

impl Header {
    /// Dive time in seconds
    pub fn dive_time(&self) -> u32 {
        u32::from(self.dive_time_m) * 60 + u32::from(self.dive_time_s)
    }

    /// Time of the end of the dive, as stored by the device
    pub fn end_time(&self) -> Result<chrono::NaiveDateTime, DiveError> {
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )
        .and_then(|d| d.and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0))
        .ok_or_else(|| {
            DiveError::InvalidTime(format!(
                "{:02}-{:02}-{:02} {:02}:{:02}",
                self.year, self.month, self.day, self.hour, self.minute
            ))
        })
    }

    fn blocks(&self) -> [(Block, Divisor); 6] {
        [
            (Block::Temperature, self.temperature),
            (Block::Deco, self.deco),
            (Block::Tank, self.tank),
            (Block::Ppo2, self.ppo2),
            (Block::DecoDebug, self.deco_debug),
            (Block::Cns, self.cns),
        ]
    }
}

/// Decode the profile samples of a dive
///
/// Temperature and deco information are set only for samples storing the
/// corresponding block. Decoding stops at a truncated sample.
pub fn samples(header: &Header, profile: &[u8]) -> Vec<RawSample> {
    let blocks = header.blocks();
    let sampling = u32::from(header.sampling);
    let mut samples = Vec::new();
    let mut pos = 0;

    while pos + 3 <= profile.len() {
        let n = samples.len() + 1;
        let depth = f64::from(u16_at(profile, pos)) / 100.0;
        let flag = profile[pos + 2];
        let end = pos + 3 + usize::from(flag & 0x7f);
        if end > profile.len() {
            warn!(sample = n, offset = pos, "Truncated profile sample");
            break;
        }

        let mut sample = RawSample {
            time: n as u32 * sampling,
            depth,
            ..Default::default()
        };

        let mut p = pos + 3;
        if flag & FLAG_EVENT != 0 {
            let Some(&event) = profile[..end].get(p) else {
                warn!(sample = n, offset = pos, "Event byte beyond sample");
                break;
            };
            p += 1;
            if event & EVENT_MANUAL_GAS != 0 {
                p += 2;
            }
            if event & EVENT_GAS_CHANGE != 0 {
                p += 1;
            }
            if p > end {
                warn!(sample = n, event = event, "Event data beyond sample");
                break;
            }
        }

        for (block, div) in blocks {
            if !div.applies(n) {
                continue;
            }
            let size = usize::from(div.size);
            if p + size > end {
                warn!(sample = n, ?block, "Extended block beyond sample");
                break;
            }
            let data = &profile[p..p + size];
            match block {
                Block::Temperature if size >= 2 => {
                    sample.temperature = Some(f64::from(u16_at(data, 0) as i16) / 10.0);
                }
                Block::Deco if size >= 2 => {
                    sample.deco_depth = Some(f64::from(data[0]));
                    sample.deco_time = Some(u32::from(data[1]));
                }
                _ => {}
            }
            p += size;
        }

        samples.push(sample);
        pos = end;
    }

    samples
}

/// Decode one dive record into a raw dive
pub fn dive(header_data: &[u8], profile: &[u8]) -> Result<RawDive, DiveError> {
    let h = header(header_data)?;
    let end = h.end_time()?;
    let samples = samples(&h, profile);

    Ok(RawDive {
        start: start_from_end(end, h.dive_time(), u32::from(h.sampling)),
        interval: u32::from(h.sampling),
        endcount: 0,
        samples,
    })
}
