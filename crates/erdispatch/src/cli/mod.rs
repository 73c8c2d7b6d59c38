//! Command-line interface for erdispatch.
//!
//! This module provides the CLI structure and command handlers for the
//! `erdctl` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CallCommand, ConfigCommand, DeskAction, DeskCommand, HistoryCommand, HospitalCommand,
    LocationArgs, OutputFormat, RequestCommand, SweepCommand,
};

/// erdctl - Emergency call dispatch
///
/// Raises emergency calls for patients, broadcasts them to nearby hospitals
/// offering the right departments, and lets hospital admins answer them.
#[derive(Debug, Parser)]
#[command(name = "erdctl")]
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
    /// Register and look up hospitals
    #[command(subcommand)]
    Hospital(HospitalCommand),

    /// Raise and follow emergency calls
    #[command(subcommand)]
    Call(CallCommand),

    /// Answer calls as a hospital admin
    Desk(DeskCommand),

    /// Review completed cases
    #[command(subcommand)]
    History(HistoryCommand),

    /// Re-broadcast calls nobody answered in time
    Sweep(SweepCommand),

    /// View or validate configuration
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
