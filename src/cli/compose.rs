// src/cli/compose.rs
//! Compose commands

use super::DbArgs;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ComposeCommands {
    /// List composes in priority order
    List {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Show one compose and its updates
    Show {
        /// Release name
        release: String,

        /// testing or stable
        request: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Run waiting composes
    Run {
        #[command(flatten)]
        db: DbArgs,

        /// Also rerun interrupted and failed composes
        #[arg(long)]
        resume: bool,
    },
}
