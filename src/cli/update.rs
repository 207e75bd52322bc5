// src/cli/update.rs
//! Update lifecycle commands

use super::DbArgs;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum UpdateCommands {
    /// Submit a new update
    New {
        /// Build NVRs
        #[arg(required = true)]
        builds: Vec<String>,

        /// Release name
        #[arg(short, long)]
        release: String,

        #[command(flatten)]
        db: DbArgs,

        /// Submitter
        #[arg(short, long)]
        user: String,

        /// bugfix, security, newpackage or enhancement
        #[arg(long = "type", default_value = "bugfix")]
        update_type: String,

        /// unspecified, urgent, high, medium or low
        #[arg(long, default_value = "unspecified")]
        severity: String,

        /// Update notes
        #[arg(long, default_value = "")]
        notes: String,

        /// Bug numbers fixed by the update
        #[arg(long, value_delimiter = ',')]
        bugs: Vec<i64>,

        /// Initial request
        #[arg(long, default_value = "testing")]
        request: String,

        /// Mark the update as critical path
        #[arg(long)]
        critpath: bool,

        #[arg(long)]
        stable_karma: Option<i32>,

        #[arg(long, allow_negative_numbers = true)]
        unstable_karma: Option<i32>,

        #[arg(long)]
        stable_days: Option<i64>,

        /// Do not push to stable automatically on karma
        #[arg(long)]
        no_autokarma: bool,

        /// Do not push to stable automatically after the testing period
        #[arg(long)]
        no_autotime: bool,
    },

    /// Show one update
    Show {
        /// Update alias or build NVR
        update: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// List updates
    List {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        release: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        request: Option<String>,

        #[arg(long)]
        user: Option<String>,
    },

    /// Change the request of an update
    Request {
        /// Update alias
        update: String,

        /// testing, stable, obsolete, unpush or revoke
        request: String,

        #[command(flatten)]
        db: DbArgs,

        #[arg(short, long)]
        user: String,
    },

    /// Comment on an update, optionally with karma
    Comment {
        /// Update alias
        update: String,

        /// Comment text
        text: String,

        #[command(flatten)]
        db: DbArgs,

        #[arg(short, long)]
        user: String,

        /// -1, 0 or 1
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        karma: i32,

        /// Critical path karma: -1, 0 or 1
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        karma_critpath: i32,
    },

    /// Replace the builds of an update
    Edit {
        /// Update alias
        update: String,

        /// New build NVRs
        #[arg(required = true)]
        builds: Vec<String>,

        #[command(flatten)]
        db: DbArgs,

        #[arg(short, long)]
        user: String,
    },

    /// Waive failed test results
    Waive {
        /// Update alias
        update: String,

        #[command(flatten)]
        db: DbArgs,

        #[arg(short, long)]
        user: String,

        /// Comment recorded with each waiver
        #[arg(long)]
        comment: Option<String>,

        /// Only waive these test cases
        #[arg(long = "test")]
        tests: Vec<String>,
    },

    /// Refresh the test gating status of an update
    Gating {
        /// Update alias
        update: String,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Approve testing updates that met their requirements, autopushing by time
    ApproveTesting {
        #[command(flatten)]
        db: DbArgs,
    },
}
