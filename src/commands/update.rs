// src/commands/update.rs
//! Update lifecycle commands
//!
//! Every change runs inside one database transaction, so a rejected request
//! leaves the update exactly as it was.

use super::{local_services, open, parse_value, print_caveats};
use crate::cli::DbArgs;
use anyhow::{Context, Result};
use bodhi::Lifecycle;
use bodhi::db::models::{
    Comment, Release, Update, UpdateFilter, UpdateRequest, UpdateSeverity, UpdateStatus,
    UpdateType,
};
use bodhi::gating::UnsatisfiedRequirement;
use bodhi::update::{Approval, NewComment, NewUpdate};
use tracing::info;

/// Options for `update new`
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub release: String,
    pub builds: Vec<String>,
    pub user: String,
    pub update_type: String,
    pub severity: String,
    pub notes: String,
    pub bugs: Vec<i64>,
    pub request: String,
    pub critpath: bool,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<i64>,
    pub autokarma: bool,
    pub autotime: bool,
}

fn find_update(conn: &rusqlite::Connection, key: &str) -> Result<Update> {
    Update::find_by_alias_or_nvr(conn, key)?.with_context(|| format!("Update {} not found", key))
}

pub fn cmd_update_new(db: &DbArgs, opts: UpdateOptions) -> Result<()> {
    let mut input = NewUpdate::new(
        &opts.release,
        &opts.builds.iter().map(String::as_str).collect::<Vec<_>>(),
    );
    input.update_type = parse_value::<UpdateType>(&opts.update_type, "update type")?;
    input.severity = parse_value::<UpdateSeverity>(&opts.severity, "severity")?;
    input.request = parse_value::<UpdateRequest>(&opts.request, "request")?;
    input.notes = opts.notes;
    input.bugs = opts.bugs;
    input.critpath = opts.critpath;
    input.stable_karma = opts.stable_karma;
    input.unstable_karma = opts.unstable_karma;
    input.stable_days = opts.stable_days;
    input.autokarma = opts.autokarma;
    input.autotime = opts.autotime;

    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;

    info!("Submitting update for {}", opts.builds.join(" "));
    let (update, caveats) = bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).create_update(input, &opts.user)
    })
    .context("Failed to create update")?;

    println!("Created update {}", update.alias);
    println!("  Builds: {}", update.title());
    println!(
        "  Status: {}, request: {}",
        update.status,
        update.request.map(|r| r.as_str()).unwrap_or("none")
    );
    print_caveats(&caveats);
    Ok(())
}

pub fn cmd_update_show(db: &DbArgs, key: &str) -> Result<()> {
    let (conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let update = find_update(&conn, key)?;
    let release = Release::get(&conn, update.release_id)?;
    let lifecycle = Lifecycle::new(&conn, &config, &services);

    println!("{} ({})", update.alias, update.title());
    println!("  Release: {}", release.name);
    println!("  Submitter: {}", update.user_name);
    println!("  Type: {}, severity: {}", update.update_type, update.severity);
    println!(
        "  Status: {}, request: {}{}",
        update.status,
        update.request.map(|r| r.as_str()).unwrap_or("none"),
        if update.locked { " (locked)" } else { "" }
    );
    println!(
        "  Karma: {} (stable at {}, unstable at {})",
        lifecycle.karma(&update)?,
        update.stable_karma.map_or("-".to_string(), |k| k.to_string()),
        update.unstable_karma.map_or("-".to_string(), |k| k.to_string())
    );
    if let Some(status) = update.test_gating_status {
        println!("  Test gating: {}", status);
        print_requirements(&update.gating_requirements(&conn)?);
    }
    if update.status == UpdateStatus::Testing {
        println!("  Days to stable: {}", lifecycle.days_to_stable(&update)?);
    }
    if !update.bugs.is_empty() {
        let bugs: Vec<String> = update.bugs.iter().map(|b| b.to_string()).collect();
        println!("  Bugs: {}", bugs.join(", "));
    }
    if !update.notes.is_empty() {
        println!("  Notes:");
        for line in update.notes.lines() {
            println!("    {}", line);
        }
    }

    let comments = Comment::find_by_update(&conn, update.require_id()?)?;
    if !comments.is_empty() {
        println!("  Comments:");
        for comment in comments {
            let karma = match comment.karma {
                k if k > 0 => " (+1)",
                k if k < 0 => " (-1)",
                _ => "",
            };
            println!(
                "    [{}] {}{}: {}",
                comment.timestamp.format("%Y-%m-%d %H:%M"),
                comment.author,
                karma,
                comment.text
            );
        }
    }
    Ok(())
}

pub fn cmd_update_list(
    db: &DbArgs,
    release: Option<&str>,
    status: Option<&str>,
    request: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    let (conn, _config) = open(db)?;

    let mut filter = UpdateFilter {
        user_name: user.map(str::to_string),
        ..Default::default()
    };
    if let Some(name) = release {
        let release = Release::find_by_name(&conn, name)?
            .with_context(|| format!("Release {} not found", name))?;
        filter.release_id = release.id;
    }
    if let Some(status) = status {
        filter.status = Some(parse_value(status, "status")?);
    }
    if let Some(request) = request {
        filter.request = Some(parse_value(request, "request")?);
    }

    let updates = Update::list(&conn, &filter)?;
    if updates.is_empty() {
        println!("No updates");
        return Ok(());
    }
    for update in updates {
        println!(
            "  {} {} [{}{}]{}",
            update.alias,
            update.title(),
            update.status,
            update
                .request
                .map(|r| format!(" -> {}", r))
                .unwrap_or_default(),
            if update.locked { " locked" } else { "" }
        );
    }
    Ok(())
}

pub fn cmd_update_request(db: &DbArgs, key: &str, request: &str, user: &str) -> Result<()> {
    let request: UpdateRequest = parse_value(request, "request")?;
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let mut update = find_update(&conn, key)?;

    bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).set_request(&mut update, request, user)
    })
    .with_context(|| format!("Failed to set request {} on {}", request, key))?;

    println!(
        "{}: status {}, request {}",
        update.alias,
        update.status,
        update.request.map(|r| r.as_str()).unwrap_or("none")
    );
    Ok(())
}

pub fn cmd_update_comment(
    db: &DbArgs,
    key: &str,
    text: &str,
    user: &str,
    karma: i32,
    karma_critpath: i32,
) -> Result<()> {
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let mut update = find_update(&conn, key)?;
    let input = NewComment {
        karma_critpath,
        ..NewComment::karma(text, karma)
    };

    let (_comment, caveats) = bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).comment(&mut update, user, input)
    })
    .with_context(|| format!("Failed to comment on {}", key))?;

    println!("Commented on {}", update.alias);
    print_caveats(&caveats);
    Ok(())
}

pub fn cmd_update_edit(db: &DbArgs, key: &str, builds: &[String], user: &str) -> Result<()> {
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let mut update = find_update(&conn, key)?;

    let caveats = bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).edit_builds(&mut update, builds, user)
    })
    .with_context(|| format!("Failed to edit {}", key))?;

    println!("{} now contains {}", update.alias, update.title());
    print_caveats(&caveats);
    Ok(())
}

pub fn cmd_update_waive(
    db: &DbArgs,
    key: &str,
    user: &str,
    comment: Option<&str>,
    tests: &[String],
) -> Result<()> {
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let mut update = find_update(&conn, key)?;

    let waivers = bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).waive_test_results(&mut update, user, comment, tests)
    })
    .with_context(|| format!("Failed to waive test results of {}", key))?;

    if waivers.is_empty() {
        println!("No unsatisfied requirements to waive on {}", update.alias);
    }
    for waiver in waivers {
        println!("Waived {} on {}", waiver.testcase, update.alias);
    }
    Ok(())
}

pub fn cmd_update_gating(db: &DbArgs, key: &str) -> Result<()> {
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;
    let mut update = find_update(&conn, key)?;

    let status = bodhi::db::transaction(&mut conn, |tx| {
        Lifecycle::new(tx, &config, &services).update_test_gating_status(&mut update)
    })
    .with_context(|| format!("Failed to refresh test gating of {}", key))?;

    println!("{}: test gating status {}", update.alias, status);
    print_requirements(&update.gating_requirements(&conn)?);
    Ok(())
}

fn print_requirements(requirements: &[UnsatisfiedRequirement]) {
    for req in requirements {
        match &req.scenario {
            Some(scenario) => println!(
                "    {} {} on {} ({})",
                req.requirement_type, req.testcase, req.item, scenario
            ),
            None => println!("    {} {} on {}", req.requirement_type, req.testcase, req.item),
        }
    }
}

pub fn cmd_update_approve_testing(db: &DbArgs) -> Result<()> {
    let (mut conn, config) = open(db)?;
    let services = local_services(&conn, &config, &db.db_path)?;

    let results = bodhi::update::approve_testing_updates(&mut conn, &config, &services)
        .context("Failed to approve testing updates")?;

    let mut approved = 0;
    for (alias, approval) in &results {
        match approval {
            Approval::Autopushed => println!("{}: stable requested", alias),
            Approval::Approved => approved += 1,
            Approval::NotReady => {}
        }
    }
    println!(
        "Checked {} testing update(s), {} approved without autopush",
        results.len(),
        approved
    );
    Ok(())
}
