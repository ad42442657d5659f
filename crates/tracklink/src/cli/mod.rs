//! Command-line interface for tracklink.
//!
//! This module provides the CLI structure for the `tracklink` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, FlyCommand, ListenCommand};

/// tracklink - Detection listener and flight sequencer
///
/// Prints the class confidence of every detection published on a perception
/// pipe, or flies a short takeoff-hover-land sequence on an autopilot.
#[derive(Debug, Parser)]
#[command(name = "tracklink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print detections from the perception pipe until interrupted
    Listen(ListenCommand),

    /// Arm, take off, hover, land
    Fly(FlyCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}
