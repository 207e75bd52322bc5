// src/commands/compose.rs
//! Compose commands

use super::{local_services, open, parse_value};
use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::compose::prioritized;
use bodhi::compose::worker::{self, WorkerReport};
use bodhi::db::models::{Compose, Release, UpdateRequest};
use tracing::info;

pub fn cmd_compose_list(db: &DbArgs) -> Result<()> {
    let (conn, _config) = open(db)?;
    let composes = prioritized(&conn, Compose::list_all(&conn)?)?;

    if composes.is_empty() {
        println!("No composes");
        return Ok(());
    }
    for compose in composes {
        let summary = compose.summary(&conn)?;
        println!(
            "  {}{} {} [{}] {} update(s), since {}",
            if summary.security { "*" } else { " " },
            summary.release_name,
            compose.request,
            compose.state,
            compose.member_ids(&conn)?.len(),
            compose.state_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub fn cmd_compose_show(db: &DbArgs, release: &str, request: &str) -> Result<()> {
    let request: UpdateRequest = parse_value(request, "request")?;
    let (conn, _config) = open(db)?;

    let release = Release::find_by_name(&conn, release)?
        .with_context(|| format!("Release {} not found", release))?;
    let release_id = release.id.context("Release has no id")?;
    let compose = Compose::find(&conn, release_id, request)?
        .with_context(|| format!("No compose for {} {}", release.name, request))?;

    println!("Compose {} {}", release.name, request);
    println!("  State: {} (since {})", compose.state, compose.state_date);
    println!("  Created: {}", compose.date_created);
    if let Some(error) = &compose.error_message {
        println!("  Error: {}", error);
    }
    let done: Vec<&str> = compose.checkpoints.keys().collect();
    if !done.is_empty() {
        println!("  Checkpoints: {}", done.join(", "));
    }
    println!("  Updates:");
    for update in compose.updates(&conn)? {
        println!("    {} {}", update.alias, update.title());
    }
    Ok(())
}

pub fn cmd_compose_run(db: &DbArgs, resume: bool) -> Result<()> {
    let (conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    drop(conn);

    info!("Running composes{}", if resume { " (resuming)" } else { "" });
    let report = worker::run_waiting(&db.db_path, &config, &services, resume)
        .context("Compose worker failed")?;
    print_report(&report);

    if !report.failed.is_empty() {
        anyhow::bail!("{} compose(s) failed", report.failed.len());
    }
    Ok(())
}

pub(crate) fn print_report(report: &WorkerReport) {
    if report.completed.is_empty() && report.failed.is_empty() {
        println!("No composes waiting");
        return;
    }
    for outcome in &report.completed {
        println!(
            "Compose {} done: {} pushed",
            outcome.compose_id,
            outcome.pushed.len()
        );
        for alias in &outcome.ejected {
            println!("  ejected {}", alias);
        }
    }
    for (key, error) in &report.failed {
        println!("Compose {} failed: {}", key, error);
    }
}
