//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::department::Department;
use crate::error::Result;
use crate::geo::GeoPoint;
use crate::model::PatientInfo;

fn parse_department(s: &str) -> std::result::Result<Department, String> {
    s.parse().map_err(|e: crate::error::Error| e.to_string())
}

/// A position given as `--lat` / `--lon`.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct LocationArgs {
    /// Latitude in degrees
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Longitude in degrees
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,
}

impl LocationArgs {
    /// The point, if both coordinates were given.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the coordinates are out of range.
    pub fn point(&self) -> Result<Option<GeoPoint>> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => GeoPoint::new(lat, lon).map(Some),
            _ => Ok(None),
        }
    }
}

/// Hospital directory and registration commands.
#[derive(Debug, Subcommand)]
pub enum HospitalCommand {
    /// Register a hospital and link its admin account
    Register {
        /// User id of the hospital admin
        #[arg(long)]
        admin: String,

        /// Hospital name
        #[arg(long)]
        name: String,

        /// Street address
        #[arg(long, default_value = "")]
        address: String,

        /// Hospital position
        #[command(flatten)]
        location: LocationArgs,

        /// Total beds
        #[arg(long, default_value = "20")]
        total_beds: u32,

        /// Available beds
        #[arg(long, default_value = "5")]
        available_beds: u32,

        /// Department offered (repeatable; Korean name or slug)
        #[arg(short, long = "department", value_parser = parse_department)]
        departments: Vec<Department>,
    },

    /// Show one hospital
    Show {
        /// Hospital id
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// List hospitals, nearest first when a position is given
    List {
        /// Only hospitals offering this department
        #[arg(short, long, value_parser = parse_department)]
        department: Option<Department>,

        /// Only hospitals whose name contains this text
        #[arg(short, long)]
        name: Option<String>,

        /// Search origin
        #[command(flatten)]
        location: LocationArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

/// Requester-side call commands.
#[derive(Debug, Subcommand)]
pub enum CallCommand {
    /// Raise a call and wait for a hospital to accept it
    Request(RequestCommand),

    /// Show a call
    Status {
        /// Call id
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Wait for a call to be accepted
    Wait {
        /// Call id
        id: String,
    },

    /// Cancel a pending call
    Cancel {
        /// Call id
        id: String,

        /// User id of the requester that raised the call
        #[arg(long)]
        requester: String,
    },

    /// Decode a model reply from the intake conversation
    Intake {
        /// The reply text (read from stdin when omitted)
        reply: Option<String>,
    },
}

/// Arguments for raising a call.
#[derive(Debug, Args)]
pub struct RequestCommand {
    /// User id of the requester
    #[arg(long)]
    pub requester: String,

    /// Patient name
    #[arg(long)]
    pub name: String,

    /// Patient age
    #[arg(long)]
    pub age: Option<u32>,

    /// Patient gender
    #[arg(long)]
    pub gender: String,

    /// Main symptom in free text
    #[arg(long)]
    pub symptom: String,

    /// Anything else the hospital should know
    #[arg(long, default_value = "")]
    pub other_info: String,

    /// Where the patient is
    #[command(flatten)]
    pub location: LocationArgs,

    /// Return after broadcasting instead of waiting for an accept
    #[arg(long)]
    pub no_wait: bool,
}

impl RequestCommand {
    /// The patient described by the arguments.
    #[must_use]
    pub fn patient(&self) -> PatientInfo {
        PatientInfo {
            name: self.name.clone(),
            age: self.age,
            gender: self.gender.clone(),
            symptom: self.symptom.clone(),
            other_info: self.other_info.clone(),
        }
    }
}

/// Hospital admin commands.
#[derive(Debug, Args)]
pub struct DeskCommand {
    /// User id of the hospital admin
    #[arg(long)]
    pub admin: String,

    /// What to do
    #[command(subcommand)]
    pub action: DeskAction,
}

/// Actions available at a hospital desk.
#[derive(Debug, Subcommand)]
pub enum DeskAction {
    /// List calls waiting for an answer
    Pending {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List accepted calls not yet completed
    Accepted {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print pending calls as they arrive and leave
    Watch,

    /// Accept a call
    Accept {
        /// Call id
        id: String,
    },

    /// Decline a call
    Reject {
        /// Call id
        id: String,
    },

    /// Complete an accepted call and archive it
    Complete {
        /// Call id
        id: String,
    },

    /// List completed cases
    Archive {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Set bed counts
    Beds {
        /// Total beds
        total: u32,
        /// Available beds
        available: u32,
    },

    /// Start offering a department
    AddDepartment {
        /// Korean name or slug
        #[arg(value_parser = parse_department)]
        department: Department,
    },

    /// Stop offering a department
    RemoveDepartment {
        /// Korean name or slug
        #[arg(value_parser = parse_department)]
        department: Department,
    },
}

/// Requester history commands.
#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List completed cases raised by a requester
    List {
        /// User id of the requester
        #[arg(long)]
        requester: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Ask the model for time and symptom trends
    Analyze {
        /// User id of the requester
        #[arg(long)]
        requester: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },
}

/// Sweep command arguments.
#[derive(Debug, Args)]
pub struct SweepCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
