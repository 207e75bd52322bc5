// src/update/mod.rs

//! Update lifecycle state machine
//!
//! [`Lifecycle`] bundles the database connection, configuration and external
//! services that every transition needs. Its operations are split by topic:
//!
//! - `create`: submitting a new update and editing its builds
//! - `request`: `set_request`, karma thresholds, unpush/revoke/obsolete
//! - `comment`: comments and karma
//! - `obsolete`: obsoleting older updates of the same packages
//! - `gating`: recording test gating results and waiving them
//! - `approve`: the periodic pass that approves or autopushes testing updates
//!
//! Operations mutate the given [`Update`] and persist it before returning.
//! Status only moves past pending/testing when a compose completes; see
//! [`crate::compose`]. Callers wrap each operation in a database transaction
//! so that a rejected transition leaves nothing behind.

mod approve;
mod comment;
mod create;
mod gating;
mod obsolete;
mod request;

pub use approve::{Approval, approve_testing_updates};
pub use comment::NewComment;
pub use create::{NewUpdate, generate_alias};
pub use request::requested_tag;

use crate::config::BodhiConfig;
use crate::db::models::{Comment, Release, Update, User};
use crate::error::Result;
use crate::karma::{self, KarmaTally, TestingPolicy};
use crate::services::Services;
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Something the caller should pass on to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caveat {
    pub name: String,
    pub description: String,
}

impl Caveat {
    pub fn new(name: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            description: description.into(),
        }
    }
}

/// Entry point for update transitions
pub struct Lifecycle<'a> {
    conn: &'a Connection,
    config: &'a BodhiConfig,
    services: &'a Services,
}

impl<'a> Lifecycle<'a> {
    pub fn new(conn: &'a Connection, config: &'a BodhiConfig, services: &'a Services) -> Self {
        Self {
            conn,
            config,
            services,
        }
    }

    pub fn config(&self) -> &BodhiConfig {
        self.config
    }

    pub fn release_of(&self, update: &Update) -> Result<Release> {
        Release::get(self.conn, update.release_id)
    }

    /// Karma tally of `update`, counting admin approvals from the configured groups
    pub fn tally(&self, update: &Update) -> Result<KarmaTally> {
        let comments = Comment::find_by_update(self.conn, update.require_id()?)?;

        let authors: BTreeSet<&str> = comments.iter().map(|c| c.author.as_str()).collect();
        let mut admins = HashSet::new();
        for author in authors {
            let groups = User::groups_of(self.conn, author)?;
            if groups.iter().any(|g| self.config.general.admin_groups.contains(g)) {
                admins.insert(author.to_string());
            }
        }

        Ok(KarmaTally::from_comments(
            &comments,
            &update.user_name,
            &self.config.general.system_users,
            &admins,
        ))
    }

    pub fn karma(&self, update: &Update) -> Result<i32> {
        Ok(self.tally(update)?.karma())
    }

    pub fn policy(&self, release: &Release, update: &Update) -> TestingPolicy {
        TestingPolicy::for_update(self.config, release, update)
    }

    pub fn meets_testing_requirements(&self, update: &Update) -> Result<bool> {
        let release = self.release_of(update)?;
        let tally = self.tally(update)?;
        Ok(karma::meets_testing_requirements(
            update,
            &tally,
            &self.policy(&release, update),
            Utc::now(),
        ))
    }

    pub fn days_to_stable(&self, update: &Update) -> Result<i64> {
        let release = self.release_of(update)?;
        let tally = self.tally(update)?;
        Ok(karma::days_to_stable(
            update,
            &tally,
            &self.policy(&release, update),
            Utc::now(),
        ))
    }

    /// Add a comment without karma
    fn add_comment(&self, update: &Update, author: &str, text: &str) -> Result<Comment> {
        User::ensure(self.conn, author)?;
        let mut comment = Comment::new(update.require_id()?, author, text, 0);
        comment.insert(self.conn)?;
        Ok(comment)
    }

    /// Comment as Bodhi itself
    fn system_comment(&self, update: &Update, text: &str) -> Result<Comment> {
        self.add_comment(update, self.config.system_user(), text)
    }

    fn update_url(&self, alias: &str) -> String {
        format!(
            "{}/updates/{}",
            self.config.general.base_url.trim_end_matches('/'),
            alias
        )
    }

    fn add_tag(&self, update: &Update, tag: Option<&str>) -> Result<()> {
        let Some(tag) = tag.filter(|t| !t.is_empty()) else {
            warn!("Not adding builds of {} to empty tag", update.alias);
            return Ok(());
        };
        debug!("Adding tag {} to {}", tag, update.title());
        for build in &update.builds {
            self.services.build_system.tag_build(tag, &build.nvr)?;
        }
        Ok(())
    }

    fn remove_tag(&self, update: &Update, tag: Option<&str>) -> Result<()> {
        let Some(tag) = tag.filter(|t| !t.is_empty()) else {
            warn!("Not removing builds of {} from empty tag", update.alias);
            return Ok(());
        };
        debug!("Removing tag {} from {}", tag, update.title());
        for build in &update.builds {
            self.services.build_system.untag_build(tag, &build.nvr)?;
        }
        Ok(())
    }

    /// Remove every release tag from the update's builds
    fn untag(&self, update: &mut Update) -> Result<()> {
        info!("Untagging {}", update.alias);
        let known = known_tags(&Release::list_all(self.conn)?);
        for build in &update.builds {
            for tag in self.services.build_system.list_tags(&build.nvr)? {
                if known.contains(&tag) {
                    self.services.build_system.untag_build(&tag, &build.nvr)?;
                } else {
                    info!("Skipping tag that we don't know about: {}", tag);
                }
            }
        }
        update.pushed = false;
        Ok(())
    }

    fn publish(&self, topic: &str, update: &Update, agent: &str) {
        self.services.bus.publish(
            topic,
            json!({
                "update": update_message(update),
                "agent": agent,
            }),
        );
    }
}

/// Every tag name any release uses
pub fn known_tags(releases: &[Release]) -> HashSet<String> {
    let mut tags = HashSet::new();
    for r in releases {
        tags.insert(r.dist_tag.clone());
        tags.insert(r.stable_tag.clone());
        tags.insert(r.testing_tag.clone());
        tags.insert(r.candidate_tag.clone());
        tags.insert(r.override_tag.clone());
        tags.extend(r.pending_signing_tag.iter().cloned());
        tags.extend(r.pending_testing_tag.iter().cloned());
        tags.extend(r.pending_stable_tag.iter().cloned());
    }
    tags
}

/// Bus representation of an update
pub fn update_message(update: &Update) -> Value {
    json!({
        "alias": update.alias,
        "title": update.title(),
        "status": update.status.as_str(),
        "request": update.request.map(|r| r.as_str()),
        "type": update.update_type.as_str(),
        "release_id": update.release_id,
        "user": update.user_name,
        "builds": update.builds.iter().map(|b| b.nvr.as_str()).collect::<Vec<_>>(),
    })
}
