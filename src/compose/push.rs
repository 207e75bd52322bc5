// src/compose/push.rs

//! Selecting updates for a push
//!
//! A push gathers the updates with a testing or stable request on the chosen
//! releases and hands them to [`Compose::from_updates`]. Updates that cannot
//! be pushed yet are reported and left out, never dropped silently.

use crate::db::models::{
    Compose, Release, ReleaseState, Update, UpdateFilter, UpdateRequest,
};
use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Which updates to push
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Release names; empty means every current, pending or frozen release
    pub releases: Vec<String>,
    pub requests: Vec<UpdateRequest>,
    /// Only updates containing one of these NVRs
    pub builds: Vec<String>,
    /// Only these update aliases
    pub updates: Vec<String>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            releases: Vec::new(),
            requests: vec![UpdateRequest::Testing, UpdateRequest::Stable],
            builds: Vec::new(),
            updates: Vec::new(),
        }
    }
}

/// Updates chosen for a push and the notes explaining what was left out
#[derive(Debug, Default)]
pub struct PushSelection {
    pub updates: Vec<Update>,
    pub warnings: Vec<String>,
}

impl PushSelection {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Releases a push covers
///
/// Naming an archived release is an error.
pub fn push_releases(conn: &Connection, names: &[String]) -> Result<Vec<Release>> {
    if names.is_empty() {
        return Release::list_by_states(
            conn,
            &[ReleaseState::Current, ReleaseState::Pending, ReleaseState::Frozen],
        );
    }

    let mut releases = Vec::with_capacity(names.len());
    for name in names {
        let release = Release::find_by_name(conn, name)?
            .ok_or_else(|| Error::NotFound(format!("release {}", name)))?;
        if release.is_archived() {
            return Err(Error::Bodhi(format!(
                "Unable to push updates for archived release {}",
                release.name
            )));
        }
        releases.push(release);
    }
    Ok(releases)
}

/// Pick the updates a push should include
pub fn select_updates(conn: &Connection, options: &PushOptions) -> Result<PushSelection> {
    let mut selection = PushSelection::default();

    for release in push_releases(conn, &options.releases)? {
        let filter = UpdateFilter {
            release_id: release.id,
            has_request: true,
            ..Default::default()
        };

        for update in Update::list(conn, &filter)? {
            let Some(request) = update.request else {
                continue;
            };
            if !options.requests.contains(&request) {
                continue;
            }
            if !options.updates.is_empty() && !options.updates.contains(&update.alias) {
                continue;
            }
            if !options.builds.is_empty()
                && !update.builds.iter().any(|b| options.builds.contains(&b.nvr))
            {
                continue;
            }

            if update.locked {
                if Compose::key_of_update(conn, update.require_id()?)?.is_some() {
                    info!("{} is already part of a compose; skipping it", update.alias);
                    continue;
                }
                selection.warn(format!(
                    "Warning: {} is locked but not in a compose; including it",
                    update.alias
                ));
            }

            let unsigned: Vec<&str> = update
                .builds
                .iter()
                .filter(|b| !b.signed)
                .map(|b| b.nvr.as_str())
                .collect();
            if !unsigned.is_empty() {
                selection.warn(format!(
                    "Warning: {} has unsigned builds ({}) and has been skipped",
                    update.alias,
                    unsigned.join(", ")
                ));
                continue;
            }

            selection.updates.push(update);
        }
    }

    info!("Selected {} update(s) to push", selection.updates.len());
    Ok(selection)
}

/// Select updates and group them into composes
pub fn push(conn: &mut Connection, options: &PushOptions) -> Result<(Vec<Compose>, PushSelection)> {
    let selection = select_updates(conn, options)?;
    if selection.updates.is_empty() {
        info!("Nothing to push");
        return Ok((Vec::new(), selection));
    }
    let composes = Compose::from_updates(conn, &selection.updates)?;
    Ok((composes, selection))
}
