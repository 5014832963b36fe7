//! Static capability table of the supported device families

use abyss_core::registry::{AttrValue, Attributes, Capability, Registry};
use std::sync::OnceLock;
use tracing::debug;

use crate::bridge::BridgeConfig;
use crate::device::{DeviceDriver, MemoryDump, Simulator};
use crate::format::DumpFormat;
use crate::ostc::{OstcDriver, OstcFormat, OstcMemoryDump, OstcSimulator};
use crate::sensus::{SensusUltraDriver, SensusUltraFormat, SensusUltraMemoryDump};
use crate::transport::SerialSettings;

/// Types implementing device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Implementor {
    OstcDriver,
    OstcSimulator,
    OstcMemoryDump,
    SensusUltraDriver,
    SensusUltraMemoryDump,
}

const OSTC: Attributes = Attributes(&[
    ("id", AttrValue::Str("ostc")),
    ("name", AttrValue::Str("OSTC Driver")),
    ("models", AttrValue::List(&["OSTC", "OSTC Mk.2", "OSTC N2"])),
]);

const OSTC_CAPABILITY: Attributes = Attributes(&[("id", AttrValue::Str("ostc"))]);

const SENSUS_ULTRA: Attributes = Attributes(&[
    ("id", AttrValue::Str("su")),
    ("name", AttrValue::Str("Sensus Ultra Driver")),
    ("models", AttrValue::List(&["Sensus Ultra"])),
]);

const SENSUS_ULTRA_CAPABILITY: Attributes = Attributes(&[("id", AttrValue::Str("su"))]);

const TABLE: &[(Capability, Implementor, Attributes)] = &[
    (Capability::Driver, Implementor::OstcDriver, OSTC),
    (Capability::Simulator, Implementor::OstcSimulator, OSTC_CAPABILITY),
    (Capability::MemoryDump, Implementor::OstcMemoryDump, OSTC_CAPABILITY),
    (Capability::Driver, Implementor::SensusUltraDriver, SENSUS_ULTRA),
    (
        Capability::MemoryDump,
        Implementor::SensusUltraMemoryDump,
        SENSUS_ULTRA_CAPABILITY,
    ),
];

/// Process wide registry, built on first use
pub fn registry() -> &'static Registry<Implementor> {
    static REGISTRY: OnceLock<Registry<Implementor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::new();
        for &(capability, implementor, attributes) in TABLE {
            registry.register(capability, implementor, attributes);
        }
        debug!(entries = TABLE.len(), "Capability registry initialized");
        registry
    })
}

/// Implementors of a capability for a device family id
pub fn lookup(capability: Capability, id: &str) -> Vec<Implementor> {
    let filter = [("id", AttrValue::Str(id))];
    registry().query(Some(capability), &filter).collect()
}

impl Implementor {
    pub fn capability(self) -> Capability {
        match self {
            Self::OstcDriver | Self::SensusUltraDriver => Capability::Driver,
            Self::OstcSimulator => Capability::Simulator,
            Self::OstcMemoryDump | Self::SensusUltraMemoryDump => Capability::MemoryDump,
        }
    }

    /// Registered attributes
    pub fn attributes(self) -> Attributes {
        registry().params(self).unwrap_or(Attributes(&[]))
    }

    /// Connect a driver on a port; `None` when no device answers or the
    /// implementor is not a driver
    pub fn driver(self, port: &str, settings: &SerialSettings) -> Option<Box<dyn DeviceDriver>> {
        match self {
            Self::OstcDriver => OstcDriver::scan(port, settings)
                .next()
                .map(|d| Box::new(d) as Box<dyn DeviceDriver>),
            Self::SensusUltraDriver => SensusUltraDriver::scan(port, settings)
                .next()
                .map(|d| Box::new(d) as Box<dyn DeviceDriver>),
            _ => {
                debug!(implementor = ?self, "Not a device driver");
                None
            }
        }
    }

    /// Connect a simulator on a port
    pub fn simulator(self, port: &str, settings: &SerialSettings) -> Option<Box<dyn Simulator>> {
        match self {
            Self::OstcSimulator => OstcDriver::scan(port, settings)
                .next()
                .map(|d| Box::new(OstcSimulator::new(d)) as Box<dyn Simulator>),
            _ => {
                debug!(implementor = ?self, "Not a simulator");
                None
            }
        }
    }

    /// Connect a memory dump on a port
    pub fn memory_dump(
        self,
        port: &str,
        settings: &SerialSettings,
    ) -> Option<Box<dyn MemoryDump>> {
        match self {
            Self::OstcMemoryDump => OstcDriver::scan(port, settings)
                .next()
                .map(|d| Box::new(OstcMemoryDump::new(d)) as Box<dyn MemoryDump>),
            Self::SensusUltraMemoryDump => SensusUltraDriver::scan(port, settings)
                .next()
                .map(|d| Box::new(SensusUltraMemoryDump::new(d)) as Box<dyn MemoryDump>),
            _ => {
                debug!(implementor = ?self, "Not a memory dump");
                None
            }
        }
    }

    /// Image format handled by a memory dump implementor
    pub fn dump_format(self, bridge: BridgeConfig) -> Option<Box<dyn DumpFormat>> {
        match self {
            Self::OstcMemoryDump => Some(Box::new(OstcFormat)),
            Self::SensusUltraMemoryDump => Some(Box::new(SensusUltraFormat::new(bridge))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id() {
        assert_eq!(lookup(Capability::Driver, "ostc"), vec![Implementor::OstcDriver]);
        assert_eq!(
            lookup(Capability::MemoryDump, "su"),
            vec![Implementor::SensusUltraMemoryDump]
        );
        assert!(lookup(Capability::Simulator, "su").is_empty());
        assert!(lookup(Capability::Driver, "vyper").is_empty());
    }

    #[test]
    fn test_drivers_have_names_and_models() {
        let drivers: Vec<_> = registry().query(Some(Capability::Driver), &[]).collect();
        assert_eq!(drivers.len(), 2);
        for d in drivers {
            let attrs = d.attributes();
            assert!(attrs.str("name").is_some());
            assert!(!attrs.list("models").is_empty());
            assert_eq!(d.capability(), Capability::Driver);
        }
        assert_eq!(
            Implementor::OstcDriver.attributes().list("models"),
            &["OSTC", "OSTC Mk.2", "OSTC N2"]
        );
    }

    #[test]
    fn test_table_capabilities_consistent() {
        for entry in registry().entries() {
            assert_eq!(entry.implementor.capability(), entry.capability);
            assert!(entry.attributes.str("id").is_some());
        }
    }

    #[test]
    fn test_dump_formats() {
        let bridge = BridgeConfig::default();
        assert!(Implementor::OstcMemoryDump.dump_format(bridge).is_some());
        assert!(Implementor::SensusUltraMemoryDump.dump_format(bridge).is_some());
        assert!(Implementor::OstcDriver.dump_format(bridge).is_none());
    }
}
