//! Abyss Driver - Dive computer drivers and dump parsers
//!
//! This crate talks to dive computers over serial lines and decodes
//! their memory images:
//! - OSTC: version, dive simulation, memory dump and profile decoding
//! - Reefnet Sensus Ultra: version, memory dump and threaded dive extraction
//!
//! Drivers are found through the static capability [`registry`].

pub mod bridge;
pub mod device;
pub mod format;
pub mod ostc;
pub mod registry;
pub mod sensus;
pub mod simulation;
pub mod transport;

pub use bridge::{BridgeConfig, Extraction, Producer};
pub use device::{DeviceDriver, MemoryDump, Simulator};
pub use format::{convert, DumpFormat, FormatError};
pub use registry::{lookup, registry, Implementor};
pub use simulation::{simulate, DiveProfile, SpecError};
pub use transport::{DeviceError, MockTransport, SerialSettings, SerialTransport, Transport};
