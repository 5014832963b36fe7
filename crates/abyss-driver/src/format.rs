//! Conversion of raw memory images into canonical dives

use abyss_core::dive::{normalize, Dive, DiveError, RawDive};
use abyss_core::uddf::DeviceDump;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::transport::DeviceError;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Dump image too short: expected {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("Invalid dump preamble")]
    InvalidPreamble,
    #[error("Invalid dive record: {0}")]
    Record(#[from] DiveError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Raw dive records of an image, in device order
pub type RawDives<'a> = Box<dyn Iterator<Item = Result<RawDive, FormatError>> + 'a>;

/// Binary layout of a device memory image
pub trait DumpFormat {
    /// Model and firmware description
    fn model(&self, data: &[u8]) -> Result<String, FormatError>;

    /// Decode the dive records of a dump
    ///
    /// Records which cannot be decoded are yielded as
    /// [`FormatError::Record`] and do not end the sequence.
    fn raw_dives<'a>(&'a self, dump: &'a DeviceDump) -> Result<RawDives<'a>, FormatError>;
}

/// Convert all valid dives of a dump
///
/// Invalid records are logged and skipped; device and layout errors
/// abort the conversion.
pub fn convert(format: &dyn DumpFormat, dump: &DeviceDump) -> Result<Vec<Dive>, FormatError> {
    let mut dives = Vec::new();
    let mut skipped = 0;

    for raw in format.raw_dives(dump)? {
        let raw = match raw {
            Ok(raw) => raw,
            Err(FormatError::Record(e)) => {
                error!(error = %e, "Invalid dive record skipped");
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let start = raw.start;
        let max_depth = raw.samples.iter().map(|s| s.depth).fold(0.0, f64::max);
        match normalize(raw) {
            Ok(dive) => {
                debug!(start = %start, samples = dive.samples.len(), "Converted dive");
                dives.push(dive);
            }
            Err(e) => {
                error!(
                    start = %start.format("%Y-%m-%d %H:%M"),
                    max_depth = max_depth,
                    error = %e,
                    "Invalid dive skipped"
                );
                skipped += 1;
            }
        }
    }

    info!(id = %dump.id, dives = dives.len(), skipped = skipped, "Dump converted");
    Ok(dives)
}
