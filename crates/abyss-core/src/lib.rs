//! Abyss Core - Capability registry, canonical dive model and UDDF support
//!
//! This crate provides the device independent parts of Abyss:
//! - Capability registry mapping device families to their implementations
//! - Canonical dive representation and normalization of device records
//! - UDDF documents for dive profiles and raw device dumps
//! - Range expressions for selecting dives

pub mod dive;
pub mod range;
pub mod registry;
pub mod uddf;
pub mod units;

pub use dive::{
    normalize, Alarm, DecoKind, DecoStop, Dive, DiveError, DiveHandle, DiveSink, RawDive,
    RawSample, Sample,
};
pub use range::{NumberRange, RangeError};
pub use registry::{AttrValue, Attributes, Capability, Registration, Registry};
pub use uddf::{DeviceDump, DiveInfo, Uddf, UddfError};
