//! Capability registry for device families
//!
//! Each device family registers the types implementing its capabilities
//! (driver, simulator, memory dump) together with a static attribute map
//! (`id`, `name`, `models`). Lookups filter entries by capability and by
//! attribute equality; extra attributes on an entry are ignored.
//!
//! The registry is built once at startup and only read afterwards.

use std::fmt;

/// Capability a device family can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Connection handling and version query
    Driver,
    /// Dive simulation mode
    Simulator,
    /// Raw memory download and conversion
    MemoryDump,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Simulator => "simulation",
            Self::MemoryDump => "dump",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a registration attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValue<'a> {
    Str(&'a str),
    List(&'a [&'a str]),
}

impl fmt::Display for AttrValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Static attribute map of a registration entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes(pub &'static [(&'static str, AttrValue<'static>)]);

impl Attributes {
    /// Look up an attribute value
    pub fn get(&self, key: &str) -> Option<AttrValue<'static>> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Look up a string attribute
    pub fn str(&self, key: &str) -> Option<&'static str> {
        match self.get(key) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up a list attribute; missing keys yield an empty list
    pub fn list(&self, key: &str) -> &'static [&'static str] {
        match self.get(key) {
            Some(AttrValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Check that every filter key exists with an equal value
    pub fn matches(&self, filter: &[(&str, AttrValue<'_>)]) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.get(key).is_some_and(|v| v == *value))
    }
}

/// One registry entry
#[derive(Debug, Clone)]
pub struct Registration<T> {
    pub capability: Capability,
    pub implementor: T,
    pub attributes: Attributes,
}

/// Registry of capability implementations
#[derive(Debug, Clone)]
pub struct Registry<T> {
    entries: Vec<Registration<T>>,
}

impl<T: Copy + PartialEq> Registry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry; duplicates are not rejected
    pub fn register(&mut self, capability: Capability, implementor: T, attributes: Attributes) {
        self.entries.push(Registration {
            capability,
            implementor,
            attributes,
        });
    }

    /// Find implementors of a capability (or of any capability when `None`)
    /// whose attributes match the filter, in registration order
    pub fn query<'a>(
        &'a self,
        capability: Option<Capability>,
        filter: &'a [(&'a str, AttrValue<'a>)],
    ) -> impl Iterator<Item = T> + 'a {
        self.entries
            .iter()
            .filter(move |e| capability.map_or(true, |c| e.capability == c))
            .filter(move |e| e.attributes.matches(filter))
            .map(|e| e.implementor)
    }

    /// Attributes of the first entry registered for an implementor
    pub fn params(&self, implementor: T) -> Option<Attributes> {
        self.entries
            .iter()
            .find(|e| e.implementor == implementor)
            .map(|e| e.attributes)
    }

    /// All entries in registration order
    pub fn entries(&self) -> &[Registration<T>] {
        &self.entries
    }
}

impl<T: Copy + PartialEq> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
