//! Command-line argument definitions.
//!
//! # Global Flags
//! - `--db <path>`: working store file
//! - `--crs <name>`: CRS recorded on datasets created by this invocation
//! - `--log-dir <path>`: enable rolling file logs in that absolute directory
//! - `--log-level <level>`: file log level

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use unitmap_core::PipelineConfig;

/// unitmap - derive geological unit polygons from digitised contacts
#[derive(Parser, Debug)]
#[command(name = "unitmap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Working store file
    #[arg(long, global = true, default_value = "unitmap.db")]
    pub db: PathBuf,

    /// Coordinate reference recorded on new datasets
    #[arg(long, global = true)]
    pub crs: Option<String>,

    /// Absolute directory for rolling log files
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log level for file logs
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or migrate the working store and list its datasets
    Init,

    /// Load a JSON dataset file into the store
    Import {
        /// Target dataset name
        name: String,
        /// JSON file with `kind`, optional `crs` and `features`
        file: PathBuf,
    },

    /// Append a row to the valid units table
    AddUnit {
        code: i64,
        name: String,
    },

    /// Derive unit polygons and print the run report as JSON
    Build(BuildArgs),

    /// Print a dataset as JSON
    Export {
        name: String,
    },

    /// Print the next versioned dataset name
    NextName {
        name: String,
        /// Skip names already used by datasets in the store
        #[arg(long)]
        available: bool,
    },
}

/// Flags overriding the pipeline config file.
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// TOML pipeline config
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub contacts: Option<String>,

    #[arg(long)]
    pub boundary: Option<String>,

    /// Output base name
    #[arg(long)]
    pub units: Option<String>,

    /// Previous output to inherit unit codes from
    #[arg(long)]
    pub prior: Option<String>,

    /// Snap tolerance in map units; overrides --map-scale
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Field map scale denominator
    #[arg(long)]
    pub map_scale: Option<f64>,

    /// Let contacts snap onto other contacts before the boundary
    #[arg(long)]
    pub no_boundary_priority: bool,

    /// Overwrite the contacts dataset with the snapped lines
    #[arg(long)]
    pub write_snapped_contacts: bool,
}

impl BuildArgs {
    /// Applies flags on top of a loaded config; unset flags keep its values.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(contacts) = &self.contacts {
            config.contacts = contacts.clone();
        }
        if let Some(boundary) = &self.boundary {
            config.boundary = boundary.clone();
        }
        if let Some(units) = &self.units {
            config.units = units.clone();
        }
        if self.prior.is_some() {
            config.prior = self.prior.clone();
        }
        if self.tolerance.is_some() {
            config.tolerance = self.tolerance;
        }
        if self.map_scale.is_some() {
            config.map_scale = self.map_scale;
        }
        if self.no_boundary_priority {
            config.snap.boundary_priority = false;
        }
        if self.write_snapped_contacts {
            config.write_snapped_contacts = true;
        }
    }
}
