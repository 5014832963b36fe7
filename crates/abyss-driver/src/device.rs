//! Device capabilities

use crate::transport::DeviceError;

/// Connection to a dive computer
pub trait DeviceDriver {
    /// Model and firmware version reported by the device
    fn version(&mut self) -> Result<String, DeviceError>;
}

/// Dive simulation mode of a dive computer
pub trait Simulator {
    /// Enter simulation mode
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Leave simulation mode
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Send the device to a depth in meters
    fn depth(&mut self, depth: f64) -> Result<(), DeviceError>;
}

/// Raw memory download
pub trait MemoryDump {
    /// Download the complete memory image
    fn dump(&mut self) -> Result<Vec<u8>, DeviceError>;
}
