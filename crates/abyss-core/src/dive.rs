//! Canonical dive representation and normalization of device records
//!
//! Device parsers produce [`RawDive`] values holding samples exactly as the
//! device logged them. [`normalize`] turns a raw dive into a [`Dive`]:
//! trailing logger samples are dropped, deco alarms are derived, summary
//! values are recomputed from the samples and zero-depth boundary samples
//! are injected so that every dive covers surface to surface.

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;

use crate::units::c2k;

/// Deepest dive accepted as physically plausible, in meters
pub const MAX_PLAUSIBLE_DEPTH: f64 = 500.0;

/// Plausible water temperature range, in Celsius
pub const PLAUSIBLE_TEMPERATURE: (f64, f64) = (-10.0, 60.0);

/// Deco time value signalling the end of a deco period
const DECO_TIME_END: u32 = 160;

/// Maximum distance between diver and deco ceiling for the alarm, in meters
const DECO_CEILING_MARGIN: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiveError {
    #[error("Dive header too short: {0} bytes")]
    Truncated(usize),
    #[error("Invalid dive time: {0}")]
    InvalidTime(String),
    #[error("Invalid sampling interval: {0}")]
    InvalidInterval(u32),
    #[error("Implausible depth: {0} m")]
    ImplausibleDepth(f64),
    #[error("Implausible temperature: {0} C")]
    ImplausibleTemperature(f64),
    #[error("No samples left after removing {0} trailing samples")]
    NoSamples(usize),
}

/// One sample as logged by a device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSample {
    /// Seconds since dive start
    pub time: u32,
    /// Depth in meters
    pub depth: f64,
    /// Temperature in Celsius, when logged in this sample
    pub temperature: Option<f64>,
    /// Deco stop depth in meters, when logged in this sample
    pub deco_depth: Option<f64>,
    /// Deco stop time in minutes, when logged in this sample
    pub deco_time: Option<u32>,
}

/// One dive as logged by a device
#[derive(Debug, Clone, PartialEq)]
pub struct RawDive {
    /// Start of the dive
    pub start: NaiveDateTime,
    /// Sampling interval in seconds
    pub interval: u32,
    /// Number of trailing samples logged after the dive ended
    pub endcount: usize,
    pub samples: Vec<RawSample>,
}

/// Kind of decompression stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoKind {
    Mandatory,
    Safety,
}

impl DecoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Safety => "safety",
        }
    }
}

/// Decompression stop information of a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoStop {
    /// Stop depth in meters
    pub depth: f64,
    /// Stop duration in seconds
    pub duration: u32,
    pub kind: DecoKind,
}

/// Alarm raised at a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    Deco,
}

impl Alarm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deco => "deco",
        }
    }
}

/// Canonical dive profile sample
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since dive start
    pub time: u32,
    /// Depth in meters
    pub depth: f64,
    /// Temperature in Kelvin
    pub temperature: Option<f64>,
    pub deco: Option<DecoStop>,
    pub alarm: Option<Alarm>,
}

impl Sample {
    /// Zero depth sample used at dive boundaries
    pub fn surface(time: u32) -> Self {
        Self {
            time,
            depth: 0.0,
            temperature: None,
            deco: None,
            alarm: None,
        }
    }
}

/// Canonical dive
#[derive(Debug, Clone, PartialEq)]
pub struct Dive {
    pub start: NaiveDateTime,
    /// Maximum depth in meters
    pub max_depth: f64,
    /// Duration in seconds
    pub duration: u32,
    /// Minimum temperature in Kelvin
    pub min_temperature: Option<f64>,
    pub samples: Vec<Sample>,
}

impl Dive {
    /// Write the dive into a sink
    pub fn write_to<S: DiveSink + ?Sized>(&self, sink: &mut S) {
        let handle = sink.create_dive(self.start, self.max_depth, self.duration, self.min_temperature);
        for sample in &self.samples {
            sink.append_sample(handle, sample);
        }
    }
}

/// Handle of a dive created in a [`DiveSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiveHandle(pub usize);

/// Destination of canonical dives (e.g. an interchange document)
pub trait DiveSink {
    fn create_dive(
        &mut self,
        start: NaiveDateTime,
        max_depth: f64,
        duration: u32,
        min_temperature: Option<f64>,
    ) -> DiveHandle;

    fn append_sample(&mut self, handle: DiveHandle, sample: &Sample);
}

/// Check if a sample starts a deco period (diver reached the stop ceiling)
pub fn deco_alarm_start(sample: &RawSample) -> bool {
    match (sample.deco_depth, sample.deco_time) {
        (Some(depth), Some(time)) => {
            depth > 0.0 && time > 0 && sample.depth - depth <= DECO_CEILING_MARGIN
        }
        _ => false,
    }
}

/// Check if a sample ends a deco period
pub fn deco_alarm_end(sample: &RawSample) -> bool {
    let Some(time) = sample.deco_time else {
        return false;
    };
    let depth = sample.deco_depth.unwrap_or(0.0);
    sample.depth - depth > DECO_CEILING_MARGIN
        || depth == 0.0
        || time == DECO_TIME_END
        || time == 0
}

/// Compute the deco alarm flag of each sample, starting with no alarm
///
/// The flag only changes on a start or end condition and stays as it is
/// in between.
pub fn deco_alarms(samples: &[RawSample]) -> Vec<bool> {
    let mut alarm = false;
    samples
        .iter()
        .map(|s| {
            if alarm && deco_alarm_end(s) {
                alarm = false;
            } else if !alarm && deco_alarm_start(s) {
                alarm = true;
            }
            alarm
        })
        .collect()
}

/// Start time of a dive recorded at its end
///
/// Devices timestamping dives on completion store the end time; the
/// sampling interval is subtracted as well to make room for the
/// injected surface sample.
pub fn start_from_end(end: NaiveDateTime, duration: u32, interval: u32) -> NaiveDateTime {
    end - Duration::seconds(i64::from(duration) + i64::from(interval))
}

/// Convert a device dive into a canonical dive
pub fn normalize(raw: RawDive) -> Result<Dive, DiveError> {
    let RawDive {
        start,
        interval,
        endcount,
        mut samples,
    } = raw;

    if interval == 0 {
        return Err(DiveError::InvalidInterval(interval));
    }

    samples.truncate(samples.len().saturating_sub(endcount));
    let last = samples.last().ok_or(DiveError::NoSamples(endcount))?;
    let duration = last.time + interval;

    let max_depth = samples.iter().map(|s| s.depth).fold(f64::MIN, f64::max);
    if !(0.0..=MAX_PLAUSIBLE_DEPTH).contains(&max_depth) {
        return Err(DiveError::ImplausibleDepth(max_depth));
    }

    let (t_min, t_max) = PLAUSIBLE_TEMPERATURE;
    let mut min_temp: Option<f64> = None;
    for t in samples.iter().filter_map(|s| s.temperature) {
        if !(t_min..=t_max).contains(&t) {
            return Err(DiveError::ImplausibleTemperature(t));
        }
        min_temp = Some(min_temp.map_or(t, |m| m.min(t)));
    }

    let alarms = deco_alarms(&samples);

    let mut normalized = Vec::with_capacity(samples.len() + 2);
    normalized.push(Sample::surface(0));
    for (s, alarm) in samples.iter().zip(alarms) {
        let deco = match s.deco_depth {
            Some(depth) if depth > 0.0 => Some(DecoStop {
                depth,
                duration: s.deco_time.unwrap_or(0) * 60,
                kind: DecoKind::Mandatory,
            }),
            _ => None,
        };
        normalized.push(Sample {
            time: s.time,
            depth: s.depth,
            temperature: s.temperature.map(c2k),
            deco,
            alarm: alarm.then_some(Alarm::Deco),
        });
    }
    normalized.push(Sample::surface(duration));

    Ok(Dive {
        start,
        max_depth,
        duration,
        min_temperature: min_temp.map(c2k),
        samples: normalized,
    })
}

/// Sort dives by start time and drop dives starting at the same time
pub fn reorder(dives: &mut Vec<Dive>) {
    dives.sort_by_key(|d| d.start);
    dives.dedup_by_key(|d| d.start);
}
