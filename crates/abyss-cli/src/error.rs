//! Command failures and their exit statuses

use abyss_core::registry::Capability;
use abyss_core::{RangeError, UddfError};
use abyss_driver::{DeviceError, FormatError, SpecError};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No {capability} implementation for '{id}'")]
    NotFound { capability: Capability, id: String },
    #[error("Ambiguous {capability} '{id}', {count} candidates")]
    Ambiguous {
        capability: Capability,
        id: String,
        count: usize,
    },
    #[error("No device found on {0}")]
    NoDevice(String),
    #[error("Cannot read {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: UddfError,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Uddf(#[from] UddfError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit status; 2 is left to argument parsing
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound { .. } | Self::Ambiguous { .. } => 3,
            Self::NoDevice(_) | Self::Device(_) | Self::Format(FormatError::Device(_)) => 4,
            Self::Range(_) | Self::Spec(_) => 5,
            Self::Input { .. } | Self::Format(_) | Self::Uddf(_) | Self::Io(_) | Self::Other(_) => 1,
        }
    }
}

impl From<&CliError> for ExitCode {
    fn from(e: &CliError) -> Self {
        ExitCode::from(e.exit_code())
    }
}
