// src/cli/build.rs
//! Build commands

use super::DbArgs;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum BuildCommands {
    /// Register a build so updates can use it
    Add {
        /// Build NVR, e.g. foo-1.0-1.fc40
        nvr: String,

        /// Release the build belongs to
        #[arg(short, long)]
        release: String,

        #[command(flatten)]
        db: DbArgs,

        /// Build epoch
        #[arg(long, default_value = "0")]
        epoch: u64,

        /// Content type: rpm, module, container or flatpak
        #[arg(long, default_value = "rpm")]
        content_type: String,

        /// Mark the build as signed
        #[arg(long)]
        signed: bool,
    },

    /// Mark a build as signed
    Sign {
        /// Build NVR
        nvr: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// List builds
    List {
        #[command(flatten)]
        db: DbArgs,
    },
}
