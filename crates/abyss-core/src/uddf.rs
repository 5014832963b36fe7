//! UDDF (Universal Dive Data Format) documents
//!
//! UDDF is an XML format for dive data. Two kinds of documents are
//! handled here:
//! - profile data, receiving canonical dives through [`DiveSink`]
//! - device dumps, storing raw device memory bzip2 compressed and base64
//!   encoded in a `divecomputerdump` element

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use chrono::NaiveDateTime;
use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dive::{DiveHandle, DiveSink, Sample};

pub const UDDF_NAMESPACE: &str = "http://www.streit.cc/uddf";
pub const UDDF_VERSION: &str = "3.0.0";

/// Timestamp format written to UDDF files
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timestamp formats accepted when reading UDDF files
const DATETIME_FORMATS: &[&str] = &[DATETIME_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

#[derive(Error, Debug)]
pub enum UddfError {
    #[error("Failed to parse UDDF: {0}")]
    ParseError(String),
    #[error("Failed to serialize UDDF: {0}")]
    SerializeError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid dump encoding: {0}")]
    EncodingError(#[from] base64::DecodeError),
    #[error("Invalid timestamp: {0}")]
    InvalidDateTime(String),
    #[error("No device dump in UDDF file")]
    MissingDump,
}

/// Software which created the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personal {
    pub firstname: String,
    pub lastname: String,
}

impl Default for Personal {
    fn default() -> Self {
        Self {
            firstname: "Anonymous".to_string(),
            lastname: "Guest".to_string(),
        }
    }
}

/// Dive computer owned by the diver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiveComputer {
    #[serde(rename = "@id")]
    pub id: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Equipment {
    #[serde(default)]
    pub divecomputer: Vec<DiveComputer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub personal: Personal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Equipment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diver {
    #[serde(default)]
    pub owner: Owner,
}

/// Reference to another element by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "@ref")]
    pub reference: String,
}

/// Raw memory of a dive computer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiveComputerDump {
    pub link: Link,
    pub datetime: String,
    /// bzip2 compressed and base64 encoded memory
    pub dcdump: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiveComputerControl {
    #[serde(default)]
    pub divecomputerdump: Vec<DiveComputerDump>,
}

/// Deco stop annotation of a waypoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoStopNode {
    #[serde(rename = "@kind")]
    pub kind: String,
    #[serde(rename = "@decodepth")]
    pub depth: f64,
    #[serde(rename = "@duration")]
    pub duration: u32,
}

/// Dive profile sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decostop: Option<DecoStopNode>,
    pub depth: f64,
    pub divetime: u32,
    /// Temperature in Kelvin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl From<&Sample> for Waypoint {
    fn from(s: &Sample) -> Self {
        Self {
            alarm: s.alarm.map(|a| a.as_str().to_string()),
            decostop: s.deco.map(|d| DecoStopNode {
                kind: d.kind.as_str().to_string(),
                depth: d.depth,
                duration: d.duration,
            }),
            depth: s.depth,
            divetime: s.time,
            temperature: s.temperature,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Samples {
    #[serde(default)]
    pub waypoint: Vec<Waypoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UddfDive {
    #[serde(rename = "@id")]
    pub id: String,
    pub datetime: String,
    pub greatestdepth: f64,
    pub diveduration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lowesttemperature: Option<f64>,
    #[serde(default)]
    pub samples: Samples,
}

impl UddfDive {
    /// Dive start time
    pub fn start(&self) -> Result<NaiveDateTime, UddfError> {
        parse_datetime(&self.datetime)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitionGroup {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub dive: Vec<UddfDive>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub repetitiongroup: Vec<RepetitionGroup>,
}

/// Root UDDF document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "uddf")]
pub struct Uddf {
    #[serde(rename = "@xmlns", default = "default_namespace")]
    pub xmlns: String,

    #[serde(rename = "@version")]
    pub version: String,

    pub generator: Generator,

    #[serde(default)]
    pub diver: Diver,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divecomputercontrol: Option<DiveComputerControl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiledata: Option<ProfileData>,
}

fn default_namespace() -> String {
    UDDF_NAMESPACE.to_string()
}

/// Summary of a stored dive, as listed to the user
#[derive(Debug, Clone, PartialEq)]
pub struct DiveInfo {
    /// 1-based position within the document
    pub number: usize,
    pub start: NaiveDateTime,
    /// Duration in minutes
    pub duration: f64,
    /// Maximum depth in meters
    pub max_depth: f64,
}

impl Uddf {
    /// Create a new empty document
    pub fn new(created: NaiveDateTime) -> Self {
        Self {
            xmlns: default_namespace(),
            version: UDDF_VERSION.to_string(),
            generator: Generator {
                name: "abyss".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                datetime: Some(format_datetime(created)),
            },
            diver: Diver::default(),
            divecomputercontrol: None,
            profiledata: None,
        }
    }

    /// Parse UDDF from XML string
    pub fn from_xml(xml: &str) -> Result<Self, UddfError> {
        from_str(xml).map_err(|e| UddfError::ParseError(e.to_string()))
    }

    /// Parse UDDF from file
    pub fn from_file(path: &Path) -> Result<Self, UddfError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_xml(&content)
    }

    /// Serialize to XML string
    pub fn to_xml(&self) -> Result<String, UddfError> {
        let xml = to_string(self).map_err(|e| UddfError::SerializeError(e.to_string()))?;
        Ok(format!("<?xml version='1.0' encoding='utf-8'?>\n{}", xml))
    }

    /// Write to file
    pub fn to_file(&self, path: &Path) -> Result<(), UddfError> {
        let xml = self.to_xml()?;
        std::fs::write(path, xml)?;
        debug!(path = %path.display(), "Saved UDDF file");
        Ok(())
    }

    /// Record the dive computer model, replacing an entry with the same id
    pub fn set_model(&mut self, id: &str, model: &str) {
        let equipment = self.diver.owner.equipment.get_or_insert_with(Equipment::default);
        equipment.divecomputer.retain(|dc| dc.id != id);
        equipment.divecomputer.push(DiveComputer {
            id: id.to_string(),
            model: model.to_string(),
        });
    }

    /// First dive computer recorded in the document
    pub fn model(&self) -> Option<&DiveComputer> {
        self.diver
            .owner
            .equipment
            .as_ref()
            .and_then(|e| e.divecomputer.first())
    }

    /// Store a device dump, replacing any previous dump
    pub fn set_dump(&mut self, dump: &DeviceDump) -> Result<(), UddfError> {
        self.set_model(&dump.id, &dump.model);
        let control = DiveComputerControl {
            divecomputerdump: vec![DiveComputerDump {
                link: Link {
                    reference: dump.id.clone(),
                },
                datetime: format_datetime(dump.time),
                dcdump: encode_dump(&dump.data)?,
            }],
        };
        self.divecomputercontrol = Some(control);
        Ok(())
    }

    /// Extract the stored device dump
    pub fn dump(&self) -> Result<DeviceDump, UddfError> {
        let node = self
            .divecomputercontrol
            .as_ref()
            .and_then(|c| c.divecomputerdump.first())
            .ok_or(UddfError::MissingDump)?;

        let id = node.link.reference.clone();
        let model = self
            .diver
            .owner
            .equipment
            .as_ref()
            .and_then(|e| e.divecomputer.iter().find(|dc| dc.id == id))
            .map(|dc| dc.model.clone())
            .unwrap_or_default();

        Ok(DeviceDump {
            id,
            model,
            time: parse_datetime(&node.datetime)?,
            data: decode_dump(&node.dcdump)?,
        })
    }

    /// All dives in document order
    pub fn dives(&self) -> impl Iterator<Item = &UddfDive> {
        self.profiledata
            .iter()
            .flat_map(|p| p.repetitiongroup.iter())
            .flat_map(|g| g.dive.iter())
    }

    /// Summaries of all dives in document order
    pub fn dive_info(&self) -> Result<Vec<DiveInfo>, UddfError> {
        self.dives()
            .enumerate()
            .map(|(i, dive)| -> Result<DiveInfo, UddfError> {
                let waypoints = &dive.samples.waypoint;
                let duration = waypoints
                    .last()
                    .map_or(dive.diveduration, |w| w.divetime);
                let max_depth = waypoints
                    .iter()
                    .map(|w| w.depth)
                    .fold(dive.greatestdepth, f64::max);
                Ok(DiveInfo {
                    number: i + 1,
                    start: dive.start()?,
                    duration: f64::from(duration) / 60.0,
                    max_depth,
                })
            })
            .collect()
    }

    fn dive_mut(&mut self, handle: DiveHandle) -> Option<&mut UddfDive> {
        self.profiledata
            .as_mut()
            .and_then(|p| p.repetitiongroup.first_mut())
            .and_then(|g| g.dive.get_mut(handle.0))
    }
}

impl DiveSink for Uddf {
    fn create_dive(
        &mut self,
        start: NaiveDateTime,
        max_depth: f64,
        duration: u32,
        min_temperature: Option<f64>,
    ) -> DiveHandle {
        let profile = self.profiledata.get_or_insert_with(ProfileData::default);
        if profile.repetitiongroup.is_empty() {
            profile.repetitiongroup.push(RepetitionGroup {
                id: "rg-1".to_string(),
                dive: Vec::new(),
            });
        }
        let group = &mut profile.repetitiongroup[0];
        let index = group.dive.len();
        group.dive.push(UddfDive {
            id: format!("dive-{}", index + 1),
            datetime: format_datetime(start),
            greatestdepth: max_depth,
            diveduration: duration,
            lowesttemperature: min_temperature,
            samples: Samples::default(),
        });
        DiveHandle(index)
    }

    fn append_sample(&mut self, handle: DiveHandle, sample: &Sample) {
        match self.dive_mut(handle) {
            Some(dive) => dive.samples.waypoint.push(Waypoint::from(sample)),
            None => warn!(handle = handle.0, "Sample for unknown dive dropped"),
        }
    }
}

/// Raw memory image downloaded from a dive computer
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDump {
    /// Device family id (e.g. "ostc")
    pub id: String,
    /// Model and firmware description
    pub model: String,
    /// Host time when the dump was taken
    pub time: NaiveDateTime,
    pub data: Vec<u8>,
}

impl DeviceDump {
    /// Read a dump from a UDDF dump file
    pub fn open(path: &Path) -> Result<Self, UddfError> {
        Uddf::from_file(path)?.dump()
    }

    /// Write the dump into a new UDDF dump file
    pub fn save(&self, path: &Path) -> Result<(), UddfError> {
        let mut doc = Uddf::new(self.time);
        doc.set_dump(self)?;
        doc.to_file(path)
    }
}

/// Compress with bzip2 and encode with base64
pub fn encode_dump(data: &[u8]) -> Result<String, UddfError> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Decode base64 text and decompress with bzip2
///
/// Whitespace in the text (e.g. from pretty printed XML) is ignored.
pub fn decode_dump(text: &str) -> Result<Vec<u8>, UddfError> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let compressed = STANDARD.decode(cleaned)?;
    let mut data = Vec::new();
    BzDecoder::new(compressed.as_slice()).read_to_end(&mut data)?;
    Ok(data)
}

pub fn format_datetime(time: NaiveDateTime) -> String {
    time.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, UddfError> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| UddfError::InvalidDateTime(s.to_string()))
}
