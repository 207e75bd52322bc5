// src/compose/mod.rs

//! Compose lock coordination
//!
//! A compose is one repository composition for a `(release, request)` pair.
//! The key is the lock: at most one non-terminal compose exists per key, and
//! every update it claims is `locked` until the compose finishes.
//!
//! - [`Compose::from_updates`] groups requested updates into composes
//! - [`composer::Composer`] runs one compose through its phases
//! - [`worker`] runs waiting composes with bounded concurrency
//! - [`push`] selects the updates a push should include

pub mod backend;
pub mod checkpoint;
pub mod composer;
pub mod push;
pub mod worker;

use crate::db;
use crate::db::models::{
    Compose, ComposeState, ContentType, Release, Update, UpdateRequest, UpdateType,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// What decides a compose's place in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeSummary {
    pub release_id: i64,
    pub release_name: String,
    pub request: UpdateRequest,
    /// Contains at least one security update
    pub security: bool,
    pub content_type: Option<ContentType>,
    pub date_created: DateTime<Utc>,
}

impl ComposeSummary {
    fn request_rank(&self) -> u8 {
        match self.request {
            UpdateRequest::Stable => 0,
            _ => 1,
        }
    }
}

impl Ord for ComposeSummary {
    /// Security composes first, then stable before testing, then oldest first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .security
            .cmp(&self.security)
            .then_with(|| self.request_rank().cmp(&other.request_rank()))
            .then_with(|| self.date_created.cmp(&other.date_created))
            .then_with(|| self.release_name.cmp(&other.release_name))
            .then_with(|| self.release_id.cmp(&other.release_id))
            .then_with(|| self.request.as_str().cmp(other.request.as_str()))
            .then_with(|| {
                self.content_type
                    .map(|c| c.as_str())
                    .cmp(&other.content_type.map(|c| c.as_str()))
            })
    }
}

impl PartialOrd for ComposeSummary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Compose {
    /// Member updates, in the order they joined
    pub fn updates(&self, conn: &Connection) -> Result<Vec<Update>> {
        self.member_ids(conn)?
            .into_iter()
            .map(|id| Update::get(conn, id))
            .collect()
    }

    pub fn summary(&self, conn: &Connection) -> Result<ComposeSummary> {
        let release = Release::get(conn, self.release_id)?;
        let updates = self.updates(conn)?;
        Ok(ComposeSummary {
            release_id: self.release_id,
            release_name: release.name,
            request: self.request,
            security: updates
                .iter()
                .any(|u| u.update_type == UpdateType::Security),
            content_type: updates.iter().find_map(|u| u.content_type()),
            date_created: self.date_created,
        })
    }

    /// Group `updates` into composes and lock them
    ///
    /// Updates without a request or without builds are skipped. Each
    /// `(release, request)` group gets one compose: a failed compose for the
    /// key is reused, while a compose still in progress makes the whole call
    /// fail with [`Error::ComposeInProgress`]. Runs in one immediate
    /// transaction, so concurrent callers are serialized.
    pub fn from_updates(conn: &mut Connection, updates: &[Update]) -> Result<Vec<Compose>> {
        let mut groups: Vec<((i64, UpdateRequest), Vec<&Update>)> = Vec::new();

        for update in updates {
            let Some(request) = update.request else {
                info!("{} has no request; not composing it", update.alias);
                continue;
            };
            if !matches!(request, UpdateRequest::Testing | UpdateRequest::Stable) {
                warn!(
                    "{} requests {}, which is not composed; skipping it",
                    update.alias, request
                );
                continue;
            }
            if update.builds.is_empty() {
                warn!("{} has no builds; not composing it", update.alias);
                continue;
            }
            let types: BTreeSet<&str> = update
                .builds
                .iter()
                .map(|b| b.content_type().as_str())
                .collect();
            if types.len() > 1 {
                return Err(Error::InvalidInput(format!(
                    "Update {} mixes content types: {}",
                    update.alias,
                    types.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }

            let key = (update.release_id, request);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(update),
                None => groups.push((key, vec![update])),
            }
        }

        db::immediate_transaction(conn, |tx| {
            let mut composes = Vec::new();
            for ((release_id, request), members) in &groups {
                if let Some(compose) = Self::claim(tx, *release_id, *request, members)? {
                    composes.push(compose);
                }
            }
            Ok(composes)
        })
    }

    /// Create or reuse the compose for one key and lock its members
    ///
    /// Members are re-read inside the transaction; one whose stored request,
    /// release or builds no longer match the key is left alone. Returns
    /// `None` when no member is left.
    fn claim(
        conn: &Connection,
        release_id: i64,
        request: UpdateRequest,
        members: &[&Update],
    ) -> Result<Option<Compose>> {
        let release = Release::get(conn, release_id)?;

        let mut fresh = Vec::with_capacity(members.len());
        for member in members {
            let update = Update::get(conn, member.require_id()?)?;
            if update.request != Some(request) || update.release_id != release_id {
                warn!(
                    "{} changed since it was selected (request {:?}); not composing it",
                    update.alias, update.request
                );
                continue;
            }
            if update.builds.is_empty() {
                warn!("{} has no builds; not composing it", update.alias);
                continue;
            }
            fresh.push(update);
        }
        if fresh.is_empty() {
            info!("Nothing left to compose for {} {}", release.name, request);
            return Ok(None);
        }

        let in_progress = || Error::ComposeInProgress {
            release: release.name.clone(),
            request: request.to_string(),
        };

        let compose = match Compose::find(conn, release_id, request)? {
            Some(existing) if !existing.state.is_terminal() => {
                return Err(in_progress());
            }
            Some(mut failed) if failed.state == ComposeState::Failed => {
                info!(
                    "Reusing failed compose for {} {}",
                    release.name, request
                );
                let existing: BTreeSet<i64> = failed.member_ids(conn)?.into_iter().collect();
                let mut wanted = existing.clone();
                for update in &fresh {
                    wanted.insert(update.require_id()?);
                }
                if wanted != existing {
                    debug!("Membership changed; discarding checkpoints");
                    failed.checkpoints = Default::default();
                    failed.save_checkpoints(conn)?;
                }
                failed.set_state(conn, ComposeState::Requested)?;
                failed.clear_error(conn)?;
                failed
            }
            Some(stale) => {
                // A successful compose should have been removed when it finished
                warn!(
                    "Replacing leftover {} compose for {} {}",
                    stale.state, release.name, request
                );
                stale.delete(conn)?;
                Self::insert_new(conn, release_id, request).map_err(|e| {
                    if e.is_constraint_violation() {
                        in_progress()
                    } else {
                        e
                    }
                })?
            }
            None => Self::insert_new(conn, release_id, request).map_err(|e| {
                if e.is_constraint_violation() {
                    in_progress()
                } else {
                    e
                }
            })?,
        };

        let current: BTreeSet<i64> = compose.member_ids(conn)?.into_iter().collect();
        let now = Utc::now();
        for mut update in fresh {
            let id = update.require_id()?;

            if let Some(key) = Compose::key_of_update(conn, id)? {
                if key != (release_id, request) {
                    return Err(Error::LockedUpdate(format!(
                        "{} is already part of another compose",
                        update.alias
                    )));
                }
            } else if update.locked {
                warn!(
                    "{} is locked without a compose; claiming it",
                    update.alias
                );
            }

            if !current.contains(&id) {
                compose.add_member(conn, id)?;
            }
            update.locked = true;
            update.date_locked = Some(now);
            update.save(conn)?;
            debug!("Locked {} for {} {}", update.alias, release.name, request);
        }

        info!(
            "Compose {} {} holds {} update(s)",
            release.name,
            request,
            compose.member_ids(conn)?.len()
        );
        Ok(Some(compose))
    }

    fn insert_new(conn: &Connection, release_id: i64, request: UpdateRequest) -> Result<Compose> {
        let compose = Compose::new(release_id, request);
        compose.insert(conn)?;
        Ok(compose)
    }
}

/// Composes in the order a worker should run them
pub fn prioritized(conn: &Connection, composes: Vec<Compose>) -> Result<Vec<Compose>> {
    let mut keyed = Vec::with_capacity(composes.len());
    for compose in composes {
        keyed.push((compose.summary(conn)?, compose));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, c)| c).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn summary(security: bool, request: UpdateRequest, age_secs: i64) -> ComposeSummary {
        ComposeSummary {
            release_id: 1,
            release_name: "F40".to_string(),
            request,
            security,
            content_type: Some(ContentType::Rpm),
            date_created: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_priority_order() {
        let mut summaries = vec![
            summary(false, UpdateRequest::Testing, 30),
            summary(false, UpdateRequest::Stable, 10),
            summary(true, UpdateRequest::Testing, 5),
            summary(true, UpdateRequest::Stable, 1),
        ];
        summaries.sort();

        let order: Vec<(bool, UpdateRequest)> =
            summaries.iter().map(|s| (s.security, s.request)).collect();
        assert_eq!(
            order,
            vec![
                (true, UpdateRequest::Stable),
                (true, UpdateRequest::Testing),
                (false, UpdateRequest::Stable),
                (false, UpdateRequest::Testing),
            ]
        );
    }

    #[test]
    fn test_older_compose_wins_tie() {
        let older = summary(false, UpdateRequest::Testing, 60);
        let newer = summary(false, UpdateRequest::Testing, 1);
        assert!(older < newer);
    }
}
