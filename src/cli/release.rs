// src/cli/release.rs
//! Release management commands

use super::DbArgs;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ReleaseCommands {
    /// Create a release with the conventional tag layout
    Create {
        /// Short name, e.g. F40
        name: String,

        #[command(flatten)]
        db: DbArgs,

        /// Long name, e.g. "Fedora 40"
        #[arg(long)]
        long_name: String,

        /// Version, e.g. 40
        #[arg(long)]
        version: String,

        /// Prefix of update aliases, e.g. FEDORA
        #[arg(long, default_value = "FEDORA")]
        id_prefix: String,

        /// Initial state: disabled, pending, frozen, current or archived
        #[arg(long, default_value = "current")]
        state: String,
    },

    /// List releases
    List {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Change the state of a release
    SetState {
        /// Release name
        name: String,

        /// New state: disabled, pending, frozen, current or archived
        state: String,

        #[command(flatten)]
        db: DbArgs,
    },
}
