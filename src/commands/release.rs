// src/commands/release.rs
//! Release management commands

use super::{open, parse_value};
use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::db::models::{Release, ReleaseState};
use tracing::info;

pub fn cmd_release_create(
    db: &DbArgs,
    name: &str,
    long_name: &str,
    version: &str,
    id_prefix: &str,
    state: &str,
) -> Result<()> {
    let state: ReleaseState = parse_value(state, "release state")?;
    let (conn, _config) = open(db)?;

    if Release::find_by_name(&conn, name)?.is_some() {
        anyhow::bail!("Release {} already exists", name);
    }

    info!("Creating release {}", name);
    let mut release = Release::new(name, long_name, version, id_prefix);
    release.state = state;
    release
        .insert(&conn)
        .with_context(|| format!("Failed to create release {}", name))?;

    println!("Created release: {} ({})", release.name, release.long_name);
    println!("  State: {}", release.state);
    println!("  Candidate tag: {}", release.candidate_tag);
    println!("  Testing tag: {}", release.testing_tag);
    println!("  Stable tag: {}", release.stable_tag);
    Ok(())
}

pub fn cmd_release_list(db: &DbArgs) -> Result<()> {
    let (conn, _config) = open(db)?;
    let releases = Release::list_all(&conn)?;

    if releases.is_empty() {
        println!("No releases");
        return Ok(());
    }
    println!("Releases:");
    for release in releases {
        println!(
            "  {} ({}) [{}] prefix {}",
            release.name, release.long_name, release.state, release.id_prefix
        );
    }
    Ok(())
}

pub fn cmd_release_set_state(db: &DbArgs, name: &str, state: &str) -> Result<()> {
    let state: ReleaseState = parse_value(state, "release state")?;
    let (conn, _config) = open(db)?;

    let mut release = Release::find_by_name(&conn, name)?
        .with_context(|| format!("Release {} not found", name))?;
    let old = release.state;
    release.set_state(&conn, state)?;
    info!("Release {} state {} -> {}", name, old, state);
    println!("Release {} is now {}", name, state);
    Ok(())
}
