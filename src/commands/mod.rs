// src/commands/mod.rs
//! Command handlers for the Bodhi CLI

mod build;
mod compose;
mod init;
mod push;
mod release;
mod update;

pub use build::{cmd_build_add, cmd_build_list, cmd_build_sign};
pub use compose::{cmd_compose_list, cmd_compose_run, cmd_compose_show};
pub use init::cmd_init;
pub use push::cmd_push;
pub use release::{cmd_release_create, cmd_release_list, cmd_release_set_state};
pub use update::{
    UpdateOptions, cmd_update_approve_testing, cmd_update_comment, cmd_update_edit, cmd_update_gating, cmd_update_list,
    cmd_update_new, cmd_update_request, cmd_update_show, cmd_update_waive,
};

use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::buildsys::DevBuildSystem;
use bodhi::{BodhiConfig, Caveat, Services};
use rusqlite::Connection;
use std::str::FromStr;

/// Open the database and load the configuration named on the command line
pub(crate) fn open(db: &DbArgs) -> Result<(Connection, BodhiConfig)> {
    let config = BodhiConfig::load_or_default(db.config.as_deref())
        .context("Failed to load configuration")?;
    let conn = bodhi::db::open(&db.db_path)
        .with_context(|| format!("Failed to open database {}", db.db_path))?;
    Ok((conn, config))
}

/// Local services backed by what the database knows about builds
pub(crate) fn local_services(
    conn: &Connection,
    config: &BodhiConfig,
    db_path: &str,
) -> Result<Services> {
    let builds = DevBuildSystem::from_database(conn).context("Failed to load builds")?;
    Ok(Services::local(builds, &config.compose_dir(db_path)))
}

/// Parse one of the database enums from a command-line value
pub(crate) fn parse_value<T>(value: &str, what: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{} (expected a {})", e, what))
}

pub(crate) fn print_caveats(caveats: &[Caveat]) {
    for caveat in caveats {
        println!("  note ({}): {}", caveat.name, caveat.description);
    }
}
