//! Subcommand implementations

use abyss_core::dive::reorder;
use abyss_core::registry::Capability;
use abyss_core::{DeviceDump, NumberRange, Uddf};
use abyss_driver::{convert as convert_dump, lookup, registry, simulate as run_simulation};
use abyss_driver::{DiveProfile, Implementor};
use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CliError;

/// Registry entry as printed by `list --json`
#[derive(Debug, Serialize)]
struct EntryInfo {
    capability: &'static str,
    id: Option<&'static str>,
    name: Option<&'static str>,
    models: &'static [&'static str],
}

/// Single implementor of a capability for a device family
pub fn find(capability: Capability, id: &str) -> Result<Implementor, CliError> {
    let found = lookup(capability, id);
    match found.as_slice() {
        [implementor] => Ok(*implementor),
        [] => Err(CliError::NotFound {
            capability,
            id: id.to_string(),
        }),
        _ => Err(CliError::Ambiguous {
            capability,
            id: id.to_string(),
            count: found.len(),
        }),
    }
}

/// First device answering on one of the ports
fn connect<T>(ports: &[String], mut open: impl FnMut(&str) -> Option<T>) -> Result<T, CliError> {
    for port in ports {
        debug!(port = %port, "Probing port");
        if let Some(device) = open(port) {
            info!(port = %port, "Device connected");
            return Ok(device);
        }
    }
    Err(CliError::NoDevice(ports.join(", ")))
}

/// Print registered drivers and their capabilities
pub fn list(out: &mut dyn Write, json: bool) -> Result<(), CliError> {
    let entries = registry().entries();

    if json {
        let info: Vec<EntryInfo> = entries
            .iter()
            .map(|e| EntryInfo {
                capability: e.capability.as_str(),
                id: e.attributes.str("id"),
                name: e.attributes.str("name"),
                models: e.attributes.list("models"),
            })
            .collect();
        let text = serde_json::to_string_pretty(&info).map_err(anyhow::Error::from)?;
        writeln!(out, "{}", text)?;
        return Ok(());
    }

    for capability in [Capability::Driver, Capability::Simulator, Capability::MemoryDump] {
        writeln!(out, "{}:", capability)?;
        for e in entries.iter().filter(|e| e.capability == capability) {
            let id = e.attributes.str("id").unwrap_or("?");
            let line = match e.attributes.str("name") {
                Some(name) => format!(
                    "  {:<6} {} ({})",
                    id,
                    name,
                    e.attributes.list("models").join(", ")
                ),
                None => format!("  {}", id),
            };
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

/// Probe the ports with every registered driver
pub fn scan(out: &mut dyn Write, config: &Config, ports: &[String]) -> Result<(), CliError> {
    let settings = config.serial_settings();
    let drivers: Vec<Implementor> = registry().query(Some(Capability::Driver), &[]).collect();
    let mut found = 0;

    for port in ports {
        for implementor in &drivers {
            let Some(mut driver) = implementor.driver(port, &settings) else {
                continue;
            };
            match driver.version() {
                Ok(version) => {
                    found += 1;
                    writeln!(out, "{}: {}", port, version)?;
                }
                Err(e) => {
                    warn!(port = %port, implementor = ?implementor, error = %e, "Version query failed")
                }
            }
        }
    }

    if found == 0 {
        writeln!(out, "No dive computers found")?;
    }
    Ok(())
}

/// Send a dive profile to a device in simulation mode
pub fn simulate(config: &Config, ports: &[String], id: &str, spec: &str) -> Result<(), CliError> {
    let profile: DiveProfile = spec.parse()?;
    let implementor = find(Capability::Simulator, id)?;
    let settings = config.serial_settings();

    let mut sim = connect(ports, |port| implementor.simulator(port, &settings))?;
    run_simulation(sim.as_mut(), &profile, config.tick())?;
    Ok(())
}

/// Download the device memory into a dump file
pub fn dump(config: &Config, ports: &[String], id: &str, output: &Path) -> Result<(), CliError> {
    let implementor = find(Capability::MemoryDump, id)?;
    let format = implementor
        .dump_format(config.bridge())
        .ok_or_else(|| CliError::NotFound {
            capability: Capability::MemoryDump,
            id: id.to_string(),
        })?;
    let settings = config.serial_settings();

    let mut device = connect(ports, |port| implementor.memory_dump(port, &settings))?;
    let data = device.dump()?;
    let model = format.model(&data)?;
    info!(model = %model, size = data.len(), "Memory dump finished");

    let dump = DeviceDump {
        id: id.to_string(),
        model,
        time: Local::now().naive_local(),
        data,
    };
    dump.save(output)?;
    info!(path = %output.display(), "Saved device dump");
    Ok(())
}

/// Convert dump files into a single dive profile file
///
/// Returns the number of dives written.
pub fn convert(config: &Config, inputs: &[PathBuf], output: &Path) -> Result<usize, CliError> {
    let mut doc = Uddf::new(Local::now().naive_local());
    let mut dives = Vec::new();

    for path in inputs {
        let dump = DeviceDump::open(path).map_err(|source| CliError::Input {
            path: path.clone(),
            source,
        })?;
        let format = find(Capability::MemoryDump, &dump.id)?
            .dump_format(config.bridge())
            .ok_or_else(|| CliError::NotFound {
                capability: Capability::MemoryDump,
                id: dump.id.clone(),
            })?;

        let converted = convert_dump(format.as_ref(), &dump)?;
        info!(path = %path.display(), dives = converted.len(), "Converted dump");
        doc.set_model(&dump.id, &dump.model);
        dives.extend(converted);
    }

    reorder(&mut dives);
    for dive in &dives {
        dive.write_to(&mut doc);
    }
    doc.to_file(output)?;
    info!(path = %output.display(), dives = dives.len(), "Saved dive profiles");
    Ok(dives.len())
}

/// Print the dives stored in profile files
pub fn dives(out: &mut dyn Write, files: &[PathBuf], range: Option<&str>) -> Result<(), CliError> {
    let range: Option<NumberRange> = range.map(str::parse::<NumberRange>).transpose()?;

    for path in files {
        let doc = Uddf::from_file(path).map_err(|source| CliError::Input {
            path: path.clone(),
            source,
        })?;
        if files.len() > 1 {
            writeln!(out, "{}:", path.display())?;
        }
        for info in doc.dive_info()? {
            if range.as_ref().is_some_and(|r| !r.contains(info.number)) {
                continue;
            }
            writeln!(
                out,
                "{:>4}  {}  {:>4.0} min  {:>5.1} m",
                info.number,
                info.start.format("%Y-%m-%d %H:%M"),
                info.duration,
                info.max_depth
            )?;
        }
    }
    Ok(())
}
