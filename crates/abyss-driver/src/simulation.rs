//! Dive simulation with a dive profile specification
//!
//! A profile is a whitespace separated list of `mm:ss,depth` points, e.g.
//! `0:30,15 3:00,25 9:00,25 10:30,5 13:30,5 14:00,0`. The dive starts at
//! the surface at time zero; depth between points is interpolated linearly
//! and sent to the device once per second.

use std::str::FromStr;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::device::Simulator;
use crate::transport::DeviceError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("Empty dive profile")]
    Empty,
    #[error("Invalid profile point '{0}', expected mm:ss,depth")]
    InvalidPoint(String),
    #[error("Invalid time '{0}'")]
    InvalidTime(String),
    #[error("Invalid depth '{0}'")]
    InvalidDepth(String),
    #[error("Point '{0}' is not later than the previous one")]
    NotIncreasing(String),
    #[error("Point '{0}' is beyond the longest dive of {max} s", max = MAX_DURATION_SECS)]
    TooLong(String),
}

/// Longest dive accepted for simulation, in seconds
pub const MAX_DURATION_SECS: u32 = 24 * 60 * 60;

/// One point of a dive profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    /// Seconds since dive start
    pub time: u32,
    /// Depth in meters
    pub depth: f64,
}

/// Dive profile to simulate
#[derive(Debug, Clone, PartialEq)]
pub struct DiveProfile {
    points: Vec<ProfilePoint>,
}

fn parse_time(s: &str) -> Result<u32, SpecError> {
    let err = || SpecError::InvalidTime(s.to_string());
    let (m, sec) = s.split_once(':').ok_or_else(err)?;
    let m: u32 = m.parse().map_err(|_| err())?;
    let sec: u32 = sec.parse().map_err(|_| err())?;
    if sec >= 60 {
        return Err(err());
    }
    m.checked_mul(60)
        .and_then(|v| v.checked_add(sec))
        .ok_or_else(err)
}

fn parse_depth(s: &str) -> Result<f64, SpecError> {
    match s.parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(d),
        _ => Err(SpecError::InvalidDepth(s.to_string())),
    }
}

impl FromStr for DiveProfile {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut points = vec![ProfilePoint {
            time: 0,
            depth: 0.0,
        }];

        for item in s.split_whitespace() {
            let (time, depth) = item
                .split_once(',')
                .ok_or_else(|| SpecError::InvalidPoint(item.to_string()))?;
            let point = ProfilePoint {
                time: parse_time(time)?,
                depth: parse_depth(depth)?,
            };
            if point.time > MAX_DURATION_SECS {
                return Err(SpecError::TooLong(item.to_string()));
            }

            match points.last_mut() {
                // explicit start point replaces the implicit surface start
                Some(last) if point.time == 0 && last.time == 0 => *last = point,
                Some(last) if point.time <= last.time => {
                    return Err(SpecError::NotIncreasing(item.to_string()))
                }
                _ => points.push(point),
            }
        }

        if points.len() < 2 {
            return Err(SpecError::Empty);
        }
        Ok(Self { points })
    }
}

impl DiveProfile {
    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    /// Dive time in seconds
    pub fn duration(&self) -> u32 {
        self.points.last().map_or(0, |p| p.time)
    }

    /// Depth at each second of the dive, from zero to the last point
    pub fn depths(&self) -> Vec<f64> {
        let mut depths = Vec::with_capacity(self.duration() as usize + 1);
        if let Some(first) = self.points.first() {
            depths.push(first.depth);
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let span = f64::from(b.time - a.time);
            for t in a.time + 1..=b.time {
                let k = f64::from(t - a.time) / span;
                depths.push(a.depth + (b.depth - a.depth) * k);
            }
        }
        depths
    }
}

/// Drive a device through a dive profile
///
/// Simulation mode is left even when sending a depth fails.
pub fn simulate<S: Simulator + ?Sized>(
    sim: &mut S,
    profile: &DiveProfile,
    tick: Duration,
) -> Result<(), DeviceError> {
    info!(duration = profile.duration(), "Starting dive simulation");
    sim.start()?;

    let result = profile.depths().into_iter().enumerate().try_for_each(|(t, depth)| {
        trace!(time = t, depth = depth, "Simulated depth");
        sim.depth(depth)?;
        sleep(tick);
        Ok(())
    });
    if let Err(e) = &result {
        warn!(error = %e, "Dive simulation interrupted");
    }

    let stopped = sim.stop();
    info!("Dive simulation finished");
    result.and(stopped)
}
