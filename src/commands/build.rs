// src/commands/build.rs
//! Build commands

use super::{open, parse_value};
use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::db::models::{Build, BuildKind, ContentType, Release};
use tracing::info;

pub fn cmd_build_add(
    db: &DbArgs,
    nvr: &str,
    release: &str,
    epoch: u64,
    content_type: &str,
    signed: bool,
) -> Result<()> {
    let content_type: ContentType = parse_value(content_type, "content type")?;
    let (conn, _config) = open(db)?;

    let release = Release::find_by_name(&conn, release)?
        .with_context(|| format!("Release {} not found", release))?;
    let release_id = release.id.context("Release has no id")?;
    if Build::find_by_nvr(&conn, nvr)?.is_some() {
        anyhow::bail!("Build {} is already registered", nvr);
    }

    let kind = match content_type {
        ContentType::Rpm => BuildKind::Rpm { epoch },
        ContentType::Module => BuildKind::Module,
        ContentType::Container => BuildKind::Container,
        ContentType::Flatpak => BuildKind::Flatpak,
    };
    let mut build = Build::new(nvr, release_id, kind)?;
    build.signed = signed;
    build.insert(&conn)?;

    info!("Registered build {} for {}", nvr, release.name);
    println!(
        "Registered {} ({}) for {}{}",
        nvr,
        content_type,
        release.name,
        if signed { ", signed" } else { "" }
    );
    Ok(())
}

pub fn cmd_build_sign(db: &DbArgs, nvr: &str) -> Result<()> {
    let (conn, _config) = open(db)?;
    let mut build =
        Build::find_by_nvr(&conn, nvr)?.with_context(|| format!("Build {} not found", nvr))?;
    if build.signed {
        println!("{} is already signed", nvr);
        return Ok(());
    }
    build.set_signed(&conn, true)?;
    info!("Marked {} as signed", nvr);
    println!("Signed {}", nvr);
    Ok(())
}

pub fn cmd_build_list(db: &DbArgs) -> Result<()> {
    let (conn, _config) = open(db)?;
    let builds = Build::list_all(&conn)?;
    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }

    for build in builds {
        let owner = match build.update_id {
            Some(id) => format!("update #{}", id),
            None => "unassigned".to_string(),
        };
        let signed = if build.signed { "signed" } else { "unsigned" };
        println!("  {} [{}] {}", build.nvr, signed, owner);
    }
    Ok(())
}
