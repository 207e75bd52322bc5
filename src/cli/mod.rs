// src/cli/mod.rs
//! CLI definitions for Bodhi
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `init` - Create the database
//! - `release` - Release management
//! - `build` - Register and sign builds
//! - `update` - Submit updates and move them through their lifecycle
//! - `push` - Group requested updates into composes
//! - `compose` - Inspect and run composes

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod build;
mod compose;
mod release;
mod update;

pub use build::BuildCommands;
pub use compose::ComposeCommands;
pub use release::ReleaseCommands;
pub use update::UpdateCommands;

pub const DEFAULT_DB_PATH: &str = "/var/lib/bodhi/bodhi.db";

#[derive(Parser)]
#[command(name = "bodhi")]
#[command(author = "Bodhi Contributors")]
#[command(version)]
#[command(about = "Update lifecycle and compose coordination", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Database and configuration shared by every command
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Path to the database file
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    pub db_path: String,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the Bodhi database
    Init {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Release management
    #[command(subcommand)]
    Release(ReleaseCommands),

    /// Build registration and signing
    #[command(subcommand)]
    Build(BuildCommands),

    /// Update submission and lifecycle
    #[command(subcommand)]
    Update(UpdateCommands),

    /// Lock requested updates into composes
    Push {
        #[command(flatten)]
        db: DbArgs,

        /// Only push these releases (default: current, pending and frozen)
        #[arg(long = "release")]
        releases: Vec<String>,

        /// Only push these requests (default: testing and stable)
        #[arg(long = "request")]
        requests: Vec<String>,

        /// Only push updates containing these builds
        #[arg(long, value_delimiter = ',')]
        builds: Vec<String>,

        /// Only push these update aliases
        #[arg(long, value_delimiter = ',')]
        updates: Vec<String>,

        /// Run the composes right away
        #[arg(long)]
        run: bool,
    },

    /// Compose inspection and execution
    #[command(subcommand)]
    Compose(ComposeCommands),
}
