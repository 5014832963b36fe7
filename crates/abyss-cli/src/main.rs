//! Abyss - Main entry point
//!
//! Talks to dive computers over serial lines, converts their memory dumps
//! into UDDF dive profiles and lists the stored dives.

mod commands;
mod config;
mod error;

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "abyss")]
#[command(about = "Dive computer download and conversion tool")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "abyss.toml")]
    config: PathBuf,

    /// Serial port of the dive computer, overrides the configured ports
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Verbose output, same as --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported dive computers and their capabilities
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look for dive computers on the serial ports
    Scan,
    /// Run a dive simulation, e.g. `simulate ostc "0:30,15 3:00,25 14:00,0"`
    Simulate {
        /// Device family id
        id: String,
        /// Dive profile as `mm:ss,depth` points
        profile: String,
    },
    /// Download the dive computer memory into a dump file
    Dump {
        /// Device family id
        id: String,
        /// Output UDDF dump file
        output: PathBuf,
    },
    /// Convert dump files into a UDDF dive profile file
    Convert {
        /// UDDF dump files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output UDDF file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List dives stored in UDDF files
    Dives {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Dive numbers to show, e.g. `1-3,5` or `20-`
        #[arg(short, long)]
        range: Option<String>,
    },
    /// Configuration file management
    Config {
        /// Write the default configuration to a file
        #[arg(long)]
        write: PathBuf,
    },
}

fn init_logging(args: &Args) -> Result<(), CliError> {
    let level = if args.verbose {
        "debug".to_string()
    } else {
        match args.log_level.to_lowercase().as_str() {
            level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
            _ => "warn".to_string(),
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(anyhow::Error::from)?;
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    init_logging(&args)?;
    debug!("Abyss v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args.config)?;
    let ports = match args.port {
        Some(port) => vec![port],
        None => config.serial.ports.clone(),
    };
    let mut out = io::stdout().lock();

    match args.command {
        Command::List { json } => commands::list(&mut out, json),
        Command::Scan => commands::scan(&mut out, &config, &ports),
        Command::Simulate { id, profile } => commands::simulate(&config, &ports, &id, &profile),
        Command::Dump { id, output } => commands::dump(&config, &ports, &id, &output),
        Command::Convert { inputs, output } => {
            let count = commands::convert(&config, &inputs, &output)?;
            info!(dives = count, "Conversion finished");
            Ok(())
        }
        Command::Dives { files, range } => commands::dives(&mut out, &files, range.as_deref()),
        Command::Config { write } => {
            config::save_default_config(&write)?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("abyss: {}", e);
            ExitCode::from(&e)
        }
    }
}
