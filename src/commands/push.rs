// src/commands/push.rs
//! Push command

use super::{local_services, open, parse_value};
use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::compose::push::{self, PushOptions};
use bodhi::compose::worker;
use bodhi::db::models::{Release, UpdateRequest};
use tracing::info;

pub fn cmd_push(
    db: &DbArgs,
    releases: Vec<String>,
    requests: &[String],
    builds: Vec<String>,
    updates: Vec<String>,
    run: bool,
) -> Result<()> {
    let mut options = PushOptions {
        releases,
        builds,
        updates,
        ..Default::default()
    };
    if !requests.is_empty() {
        options.requests = requests
            .iter()
            .map(|r| parse_value::<UpdateRequest>(r, "request"))
            .collect::<Result<Vec<_>>>()?;
    }

    let (mut conn, config) = open(db)?;
    let (composes, selection) = push::push(&mut conn, &options).context("Push failed")?;

    for warning in &selection.warnings {
        println!("{}", warning);
    }
    if composes.is_empty() {
        println!("Nothing to push");
        return Ok(());
    }

    println!("Locked {} update(s) into {} compose(s):", selection.updates.len(), composes.len());
    for compose in &composes {
        let release = Release::get(&conn, compose.release_id)?;
        println!(
            "  {} {}: {} update(s)",
            release.name,
            compose.request,
            compose.member_ids(&conn)?.len()
        );
    }

    if run {
        info!("Running composes");
        let services = local_services(&conn, &config, &db.db_path)?;
        drop(conn);
        let report = worker::run_waiting(&db.db_path, &config, &services, false)
            .context("Compose worker failed")?;
        super::compose::print_report(&report);
    }
    Ok(())
}
