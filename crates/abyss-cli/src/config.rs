//! Configuration loading and defaults

use abyss_driver::{BridgeConfig, SerialSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Ports probed when no port is given on the command line
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,
    /// Read timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_ports() -> Vec<String> {
    if cfg!(windows) {
        vec!["COM1".to_string(), "COM2".to_string(), "COM3".to_string()]
    } else {
        vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()]
    }
}

fn default_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Items buffered between extraction worker and consumer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Worker gives up after waiting this long on a full queue
    #[serde(default = "default_put_timeout")]
    pub put_timeout_secs: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_millis: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            put_timeout_secs: default_put_timeout(),
            poll_timeout_millis: default_poll_timeout(),
        }
    }
}

fn default_queue_capacity() -> usize {
    5
}

fn default_put_timeout() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time between two depth updates
    #[serde(default = "default_tick")]
    pub tick_millis: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick(),
        }
    }
}

fn default_tick() -> u64 {
    1000
}

impl Config {
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            timeout: Duration::from_secs(self.serial.timeout_secs),
            ..SerialSettings::default()
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            capacity: self.extraction.queue_capacity.max(1),
            put_timeout: Duration::from_secs(self.extraction.put_timeout_secs),
            poll_timeout: Duration::from_millis(self.extraction.poll_timeout_millis),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.simulation.tick_millis)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Saved default configuration");
    Ok(())
}
