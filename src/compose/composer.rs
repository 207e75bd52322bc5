// src/compose/composer.rs

//! Running one compose
//!
//! A run walks the compose through its states, checkpointing each expensive
//! phase on the compose row. Re-running a compose that crashed or failed
//! starts again at `initializing` and skips every phase already marked done.
//! Update statuses change in one transaction once the repository is synced;
//! until then every member stays locked.

use super::backend::ComposeJob;
use crate::config::BodhiConfig;
use crate::db;
use crate::db::models::{
    Comment, Compose, ComposeState, Release, ReleaseState, Update, UpdateRequest, UpdateStatus,
    User,
};
use crate::error::{Error, Result};
use crate::gating::{self, Verdict};
use crate::notifications::topics;
use crate::resolver::sorted_updates;
use crate::services::Services;
use crate::update::{Lifecycle, requested_tag, update_message};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

const COMPOSE_ID: &str = "compose_id";
const TAG_ACTIONS: &str = "determine_and_perform_tag_actions";
const UPDATEINFO: &str = "updateinfo";
const COMPLETED_REPO: &str = "completed_repo";
const SIGN_REPO: &str = "sign_repo";
const SYNC_REPO: &str = "sync_repo";
const STATUS_CHANGES: &str = "mark_status_changes";

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOutcome {
    pub compose_id: String,
    pub release: String,
    pub request: UpdateRequest,
    /// Aliases of updates whose status changed
    pub pushed: Vec<String>,
    /// Aliases of updates removed from the compose
    pub ejected: Vec<String>,
}

/// A planned tag change for one build
struct TagMove {
    from: String,
    to: String,
    nvr: String,
}

pub struct Composer<'a> {
    conn: &'a mut Connection,
    config: &'a BodhiConfig,
    services: &'a Services,
}

impl<'a> Composer<'a> {
    pub fn new(conn: &'a mut Connection, config: &'a BodhiConfig, services: &'a Services) -> Self {
        Self {
            conn,
            config,
            services,
        }
    }

    /// Run the compose for `(release_id, request)` to completion
    ///
    /// On error the compose is marked failed with the error message and its
    /// updates stay locked.
    pub fn run(&mut self, release_id: i64, request: UpdateRequest) -> Result<ComposeOutcome> {
        let mut compose = Compose::get(self.conn, release_id, request)?;
        let release = Release::get(self.conn, release_id)?;
        info!("Running compose {} {}", release.name, request);

        match self.run_phases(&mut compose, &release) {
            Ok(outcome) => {
                info!(
                    "Compose {} finished: {} pushed, {} ejected",
                    outcome.compose_id,
                    outcome.pushed.len(),
                    outcome.ejected.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("Compose {} {} failed: {}", release.name, request, e);
                if let Err(mark) = compose.fail(self.conn, &e.to_string()) {
                    error!(
                        "Could not mark compose {} {} failed: {}",
                        release.name, request, mark
                    );
                }
                Err(e)
            }
        }
    }

    fn run_phases(&mut self, compose: &mut Compose, release: &Release) -> Result<ComposeOutcome> {
        let request = compose.request;
        compose.set_state(self.conn, ComposeState::Initializing)?;
        if compose.error_message.is_some() {
            compose.clear_error(self.conn)?;
        }

        let compose_id = match compose.checkpoints.get_str(COMPOSE_ID) {
            Some(id) => {
                info!("Resuming compose {}", id);
                id.to_string()
            }
            None => {
                let id = format!(
                    "{}-{}-{}",
                    release.name,
                    request,
                    Utc::now().format("%Y%m%d.%H%M%S")
                );
                compose.checkpoints.set_str(COMPOSE_ID, &id);
                compose.save_checkpoints(self.conn)?;
                id
            }
        };

        let mut outcome = ComposeOutcome {
            compose_id: compose_id.clone(),
            release: release.name.clone(),
            request,
            pushed: Vec::new(),
            ejected: Vec::new(),
        };

        // Statuses are committed and the members released; only cleanup is left
        if compose.checkpoints.is_done(STATUS_CHANGES) {
            info!("Statuses of {} already committed; finishing up", compose_id);
            let job = ComposeJob {
                id: compose_id,
                release: release.clone(),
                request,
                updates: Vec::new(),
            };
            let composed = compose.checkpoints.get_str(COMPLETED_REPO).is_some();
            self.finish(compose, &job, composed)?;
            return Ok(outcome);
        }

        let mut updates = compose.updates(self.conn)?;

        self.services.bus.publish(
            topics::COMPOSE_START,
            json!({
                "compose": compose_id,
                "release": release.name,
                "request": request.as_str(),
                "updates": updates.iter().map(|u| u.alias.as_str()).collect::<Vec<_>>(),
                "agent": self.config.system_user(),
            }),
        );

        if request == UpdateRequest::Stable {
            self.perform_gating(compose, release, &mut updates, &mut outcome)?;
        }

        // A pending release has no repository yet; its builds only get tagged
        let skip_compose = request == UpdateRequest::Stable && release.state == ReleaseState::Pending;

        if compose.checkpoints.is_done(TAG_ACTIONS) {
            debug!("Tag actions of {} already performed", compose_id);
        } else {
            self.determine_and_perform_tag_actions(
                compose,
                release,
                &mut updates,
                skip_compose,
                &mut outcome,
            )?;
            compose.checkpoints.mark_done(TAG_ACTIONS);
            compose.save_checkpoints(self.conn)?;
        }
        self.remove_pending_tags(release, request, &updates)?;

        let job = ComposeJob {
            id: compose_id.clone(),
            release: release.clone(),
            request,
            updates: updates.clone(),
        };
        let composed = !skip_compose && !updates.is_empty();
        if composed {
            self.repo_phases(compose, &job)?;
        } else if updates.is_empty() {
            warn!("No updates left in compose {}", compose_id);
        } else {
            info!("Not composing {}: release {} is pending", compose_id, release.name);
        }

        self.mark_pushed(compose, &mut updates)?;
        outcome.pushed = updates.iter().map(|u| u.alias.clone()).collect();

        self.send_notifications(&compose_id, request, &updates);
        self.after_push(request, &mut updates);

        self.finish(compose, &job, composed)?;
        Ok(outcome)
    }

    /// Clean old composes if a repository was built, then drop the row
    fn finish(&mut self, compose: &mut Compose, job: &ComposeJob, composed: bool) -> Result<()> {
        if composed && self.config.compose.clean_old_composes {
            compose.set_state(self.conn, ComposeState::Cleaning)?;
            if let Err(e) = self.services.backend.clean_old_composes(job) {
                warn!("Could not clean old composes for {}: {}", job.id, e);
            }
        }

        compose.set_state(self.conn, ComposeState::Success)?;
        compose.delete(self.conn)
    }

    /// Eject stable updates that test gating does not allow through
    fn perform_gating(
        &mut self,
        compose: &Compose,
        release: &Release,
        updates: &mut Vec<Update>,
        outcome: &mut ComposeOutcome,
    ) -> Result<()> {
        if !self.config.test_gating.required {
            return Ok(());
        }

        let mut kept = Vec::with_capacity(updates.len());
        for update in std::mem::take(updates) {
            match gating::stable_verdict(update.test_gating_status) {
                Verdict::Allowed => kept.push(update),
                Verdict::Pending(reason) | Verdict::Blocked(reason) => {
                    outcome.ejected.push(update.alias.clone());
                    self.eject(compose, release, update, &reason)?;
                }
            }
        }
        *updates = kept;
        Ok(())
    }

    /// Take `update` out of the compose: unlock it and drop its request
    fn eject(
        &mut self,
        compose: &Compose,
        release: &Release,
        mut update: Update,
        reason: &str,
    ) -> Result<()> {
        warn!("{} ejected from the push because {:?}", update.alias, reason);

        let config = self.config;
        let system = config.system_user();
        db::transaction(self.conn, |tx| {
            let update_id = update.require_id()?;
            compose.remove_member(tx, update_id)?;
            update.locked = false;
            update.date_locked = None;
            update.request = None;
            update.save(tx)?;

            User::ensure(tx, system)?;
            let text = format!(
                "{} ejected from the push because '{}'",
                update.alias, reason
            );
            Comment::new(update_id, system, &text, 0).insert(tx)?;
            Ok(())
        })?;

        let pending_tag = match compose.request {
            UpdateRequest::Stable => release.pending_stable_tag.as_deref(),
            _ => release.pending_testing_tag.as_deref(),
        };
        if let Some(tag) = pending_tag {
            for build in &update.builds {
                let tags = self.services.build_system.list_tags(&build.nvr)?;
                if tags.iter().any(|t| t == tag) {
                    self.services.build_system.untag_build(tag, &build.nvr)?;
                }
            }
        }

        self.services.bus.publish(
            topics::UPDATE_EJECT,
            json!({
                "update": update_message(&update),
                "reason": reason,
                "release": release.name,
                "request": compose.request.as_str(),
                "agent": system,
            }),
        );
        Ok(())
    }

    /// Move (or, for a pending release, add) each build to its requested tag
    ///
    /// Updates are handled in dependency order: the sync group one at a time,
    /// then the parallel group. An update whose builds are not in the tag they
    /// should come from is ejected.
    fn determine_and_perform_tag_actions(
        &mut self,
        compose: &Compose,
        release: &Release,
        updates: &mut Vec<Update>,
        skip_compose: bool,
        outcome: &mut ComposeOutcome,
    ) -> Result<()> {
        let sorted = sorted_updates(updates.as_slice());
        let build_system = &self.services.build_system;

        let mut ejections: Vec<(usize, String)> = sorted
            .skipped
            .iter()
            .map(|&i| (i, "it has no builds".to_string()))
            .collect();
        let mut moves = Vec::new();

        for index in sorted.ordered() {
            let update = &updates[index];
            let to = requested_tag(update, release)?;
            let from_tag = if update.status == UpdateStatus::Testing {
                release.testing_tag.as_str()
            } else {
                release.candidate_tag.as_str()
            };

            let mut planned = Vec::new();
            let mut missing = None;
            for build in &update.builds {
                let tags = build_system.list_tags(&build.nvr)?;
                if tags.contains(&to) {
                    debug!("{} is already tagged {}", build.nvr, to);
                    continue;
                }
                if tags.iter().any(|have| have == from_tag) {
                    planned.push(TagMove {
                        from: from_tag.to_string(),
                        to: to.clone(),
                        nvr: build.nvr.clone(),
                    });
                } else {
                    missing = Some(format!(
                        "Cannot find relevant tag for {}.  {} is not in {:?}.",
                        build.nvr, from_tag, tags
                    ));
                    break;
                }
            }

            match missing {
                Some(reason) => ejections.push((index, reason)),
                None => moves.extend(planned),
            }
        }

        for action in &moves {
            if skip_compose {
                debug!("Adding {} to {}", action.nvr, action.to);
                build_system.tag_build(&action.to, &action.nvr)?;
            } else {
                debug!("Moving {} from {} to {}", action.nvr, action.from, action.to);
                build_system.move_build(&action.from, &action.to, &action.nvr)?;
            }
        }
        info!("Performed {} tag action(s)", moves.len());

        ejections.sort_by(|a, b| b.0.cmp(&a.0));
        for (index, reason) in ejections {
            let update = updates.remove(index);
            outcome.ejected.push(update.alias.clone());
            self.eject(compose, release, update, &reason)?;
        }
        Ok(())
    }

    fn remove_pending_tags(
        &self,
        release: &Release,
        request: UpdateRequest,
        updates: &[Update],
    ) -> Result<()> {
        let pending: Vec<&str> = match request {
            UpdateRequest::Stable => release.pending_stable_tag.iter().map(String::as_str).collect(),
            _ => release
                .pending_signing_tag
                .iter()
                .chain(release.pending_testing_tag.iter())
                .map(String::as_str)
                .collect(),
        };

        for update in updates {
            for build in &update.builds {
                let tags = self.services.build_system.list_tags(&build.nvr)?;
                for tag in &pending {
                    if tags.iter().any(|t| t == tag) {
                        debug!("Removing pending tag {} from {}", tag, build.nvr);
                        self.services.build_system.untag_build(tag, &build.nvr)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn repo_phases(&mut self, compose: &mut Compose, job: &ComposeJob) -> Result<()> {
        let backend = &self.services.backend;

        if compose.checkpoints.is_done(UPDATEINFO) {
            debug!("Skipping updateinfo of {}", job.id);
        } else {
            compose.set_state(self.conn, ComposeState::Updateinfo)?;
            backend.generate_updateinfo(job)?;
            compose.checkpoints.mark_done(UPDATEINFO);
            compose.save_checkpoints(self.conn)?;
        }

        let repo = match compose.checkpoints.get_str(COMPLETED_REPO) {
            Some(path) => {
                debug!("Reusing composed repository {}", path);
                PathBuf::from(path)
            }
            None => {
                compose.set_state(self.conn, ComposeState::Punging)?;
                self.services.bus.publish(
                    topics::COMPOSE_COMPOSING,
                    json!({
                        "compose": job.id,
                        "release": job.release.name,
                        "request": job.request.as_str(),
                    }),
                );
                let repo = backend.compose_repo(job)?;
                compose
                    .checkpoints
                    .set_str(COMPLETED_REPO, &repo.to_string_lossy());
                compose.save_checkpoints(self.conn)?;
                repo
            }
        };

        if compose.checkpoints.is_done(SIGN_REPO) {
            debug!("Skipping signing of {}", job.id);
        } else {
            compose.set_state(self.conn, ComposeState::SigningRepo)?;
            backend.sign_repo(job, &repo)?;
            compose.checkpoints.mark_done(SIGN_REPO);
            compose.save_checkpoints(self.conn)?;
        }

        if compose.checkpoints.is_done(SYNC_REPO) {
            debug!("Skipping sync of {}", job.id);
        } else {
            compose.set_state(self.conn, ComposeState::SyncingRepo)?;
            backend.sync_repo(job, &repo)?;
            compose.checkpoints.mark_done(SYNC_REPO);
            compose.save_checkpoints(self.conn)?;
        }
        Ok(())
    }

    /// Commit the new statuses, unlock the updates and move to `notifying`
    ///
    /// The same transaction empties the compose and checkpoints the commit,
    /// so a resumed run never touches the released updates again.
    fn mark_pushed(&mut self, compose: &mut Compose, updates: &mut [Update]) -> Result<()> {
        let request = compose.request;
        let config = self.config;
        let system = config.system_user();
        let now = Utc::now();

        db::transaction(self.conn, |tx| {
            User::ensure(tx, system)?;
            for update in updates.iter_mut() {
                match request {
                    UpdateRequest::Testing => {
                        update.status = UpdateStatus::Testing;
                        update.date_testing = Some(now);
                    }
                    UpdateRequest::Stable => {
                        update.status = UpdateStatus::Stable;
                        update.date_stable = Some(now);
                    }
                    other => {
                        return Err(Error::Bodhi(format!(
                            "Cannot compose {} for request {}",
                            update.alias, other
                        )));
                    }
                }
                update.date_pushed = Some(now);
                update.pushed = true;
                update.request = None;
                update.locked = false;
                update.date_locked = None;
                update.save(tx)?;

                let update_id = update.require_id()?;
                let text = format!("This update has been pushed to {}.", request);
                Comment::new(update_id, system, &text, 0).insert(tx)?;
                compose.remove_member(tx, update_id)?;
                info!("{} is now {}", update.alias, update.status);
            }
            compose.checkpoints.mark_done(STATUS_CHANGES);
            compose.save_checkpoints(tx)?;
            compose.set_state(tx, ComposeState::Notifying)
        })
    }

    fn send_notifications(&self, compose_id: &str, request: UpdateRequest, updates: &[Update]) {
        let system = self.config.system_user();
        let topic = topics::update_complete(request.as_str());
        for update in updates {
            self.services.bus.publish(
                &topic,
                json!({"update": update_message(update), "agent": system}),
            );
            if request == UpdateRequest::Testing {
                self.services.bus.publish(
                    topics::UPDATE_STATUS_TESTING,
                    json!({"update": update_message(update), "agent": system}),
                );
            }
        }

        self.services.bus.publish(
            topics::COMPOSE_COMPLETE,
            json!({
                "compose": compose_id,
                "request": request.as_str(),
                "updates": updates.iter().map(|u| u.alias.as_str()).collect::<Vec<_>>(),
                "success": true,
                "agent": system,
            }),
        );
    }

    /// Karma thresholds and obsoletion for freshly pushed updates
    ///
    /// The push already happened, so failures here are logged and skipped.
    fn after_push(&mut self, request: UpdateRequest, updates: &mut [Update]) {
        let config = self.config;
        let services = self.services;
        let system = config.system_user();

        for update in updates.iter_mut() {
            let result = db::transaction(self.conn, |tx| {
                let lifecycle = Lifecycle::new(tx, config, services);
                if request == UpdateRequest::Testing {
                    lifecycle.check_karma_thresholds(update, system)?;
                }
                lifecycle.obsolete_older_updates(update)?;
                Ok(())
            });
            if let Err(e) = result {
                warn!("Post-push checks for {} failed: {}", update.alias, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildsys::{BuildSystem, DevBuildSystem};
    use crate::compose::backend::{ComposeBackend, StagingBackend};
    use crate::db::models::TestGatingStatus;
    use crate::db::schema;
    use crate::gating::{MemoryWaivers, NoPolicyDecisions};
    use crate::notifications::MemoryBus;
    use crate::update::NewUpdate;
    use std::sync::Arc;
    use tempfile::{NamedTempFile, TempDir};

    struct Fixture {
        _db: NamedTempFile,
        _dir: TempDir,
        conn: Connection,
        config: BodhiConfig,
        services: Services,
        builds: Arc<DevBuildSystem>,
        bus: Arc<MemoryBus>,
        release_id: i64,
    }

    fn fixture(config: BodhiConfig) -> Fixture {
        let db = NamedTempFile::new().unwrap();
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(db.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();

        let mut release = Release::new("F40", "Fedora 40", "40", "FEDORA");
        release.state = ReleaseState::Current;
        let release_id = release.insert(&conn).unwrap();

        let builds = Arc::new(DevBuildSystem::new());
        let bus = Arc::new(MemoryBus::new());
        let backend: Arc<dyn ComposeBackend> = Arc::new(StagingBackend::new(dir.path()));
        let services = Services::new(
            builds.clone(),
            Arc::new(NoPolicyDecisions),
            Arc::new(MemoryWaivers::new()),
            bus.clone(),
            backend,
        );

        Fixture {
            _db: db,
            _dir: dir,
            conn,
            config,
            services,
            builds,
            bus,
            release_id,
        }
    }

    fn submit(fx: &Fixture, nvr: &str) -> Update {
        fx.builds
            .add_build(nvr, 0, true, &["f40-updates-candidate"])
            .unwrap();
        let lifecycle = Lifecycle::new(&fx.conn, &fx.config, &fx.services);
        let (update, _) = lifecycle
            .create_update(NewUpdate::new("F40", &[nvr]), "alice")
            .unwrap();
        update
    }

    #[test]
    fn test_testing_compose_pushes_and_unlocks() {
        let mut fx = fixture(BodhiConfig::default());
        let update = submit(&fx, "foo-1.0-1.fc40");
        Compose::from_updates(&mut fx.conn, &[update.clone()]).unwrap();

        let outcome = Composer::new(&mut fx.conn, &fx.config, &fx.services)
            .run(fx.release_id, UpdateRequest::Testing)
            .unwrap();
        assert_eq!(outcome.pushed, vec![update.alias.clone()]);

        let stored = Update::get_by_alias(&fx.conn, &update.alias).unwrap();
        assert_eq!(stored.status, UpdateStatus::Testing);
        assert_eq!(stored.request, None);
        assert!(!stored.locked);
        assert!(stored.pushed);
        assert!(stored.date_testing.is_some());

        let tags = fx.builds.list_tags("foo-1.0-1.fc40").unwrap();
        assert!(tags.contains(&"f40-updates-testing".to_string()));
        assert!(!tags.contains(&"f40-updates-candidate".to_string()));
        assert!(!tags.contains(&"f40-signing-pending".to_string()));

        assert!(
            Compose::find(&fx.conn, fx.release_id, UpdateRequest::Testing)
                .unwrap()
                .is_none()
        );
        assert_eq!(
            fx.bus.on_topic("bodhi.update.complete.testing").len(),
            1
        );
    }

    #[test]
    fn test_stable_compose_ejects_gated_update() {
        let mut config = BodhiConfig::default();
        config.test_gating.required = true;
        let mut fx = fixture(config);

        let mut update = submit(&fx, "foo-1.0-1.fc40");
        update.status = UpdateStatus::Testing;
        update.request = Some(UpdateRequest::Stable);
        update.test_gating_status = Some(TestGatingStatus::Failed);
        update.save(&fx.conn).unwrap();
        Compose::from_updates(&mut fx.conn, &[update.clone()]).unwrap();

        let outcome = Composer::new(&mut fx.conn, &fx.config, &fx.services)
            .run(fx.release_id, UpdateRequest::Stable)
            .unwrap();
        assert!(outcome.pushed.is_empty());
        assert_eq!(outcome.ejected, vec![update.alias.clone()]);

        let stored = Update::get_by_alias(&fx.conn, &update.alias).unwrap();
        assert_eq!(stored.status, UpdateStatus::Testing);
        assert_eq!(stored.request, None);
        assert!(!stored.locked);
        let comments = Comment::find_by_update(&fx.conn, stored.require_id().unwrap()).unwrap();
        assert!(
            comments
                .iter()
                .any(|c| c.text.contains("ejected from the push because"))
        );
        assert_eq!(fx.bus.on_topic(topics::UPDATE_EJECT).len(), 1);
    }

    #[test]
    fn test_pending_release_skips_repository() {
        let mut fx = fixture(BodhiConfig::default());
        let mut release = Release::get(&fx.conn, fx.release_id).unwrap();
        release.set_state(&fx.conn, ReleaseState::Pending).unwrap();

        let mut update = submit(&fx, "foo-1.0-1.fc40");
        update.request = Some(UpdateRequest::Stable);
        update.save(&fx.conn).unwrap();
        Compose::from_updates(&mut fx.conn, &[update.clone()]).unwrap();

        Composer::new(&mut fx.conn, &fx.config, &fx.services)
            .run(fx.release_id, UpdateRequest::Stable)
            .unwrap();

        let tags = fx.builds.list_tags("foo-1.0-1.fc40").unwrap();
        assert!(tags.contains(&"f40".to_string()));
        assert!(tags.contains(&"f40-updates-candidate".to_string()));
        assert!(fx.bus.on_topic(topics::COMPOSE_COMPOSING).is_empty());

        let stored = Update::get_by_alias(&fx.conn, &update.alias).unwrap();
        assert_eq!(stored.status, UpdateStatus::Stable);
    }
}
