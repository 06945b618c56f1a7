use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, settings::ConnectionSettings};

/// Relay a serial device to websocket clients.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Listen on this address instead of the configured one
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Attach to this port at startup
    #[arg(long, requires = "baud")]
    pub port: Option<String>,

    /// Baud rate for `--port`
    #[arg(long, requires = "port", value_parser = clap::value_parser!(u32).range(1..))]
    pub baud: Option<u32>,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log more. Repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The level to log at on stdout.
    pub fn stdout_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Where and how much to log to files, if at all.
    pub fn file_logging(&self) -> Option<(Level, PathBuf)> {
        self.log_dir
            .clone()
            .map(|dir| (Level::DEBUG.max(self.stdout_level()), dir))
    }

    /// Let the command line override the configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = self.address {
            config.address = address;
        }

        if let (Some(port), Some(baud)) = (&self.port, self.baud) {
            config.initial = Some(ConnectionSettings::new(port, baud));
        }
    }
}

/// Commands available in the command line interface.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show examples of things used by the relay.
    #[command(subcommand)]
    Examples(Examples),
}

/// Examples which can be printed.
#[derive(Debug, Subcommand)]
pub enum Examples {
    /// A configuration file's contents.
    Config,

    /// A request to change which port is used.
    Reconfigure,

    /// A request to write to the device.
    Command,
}
