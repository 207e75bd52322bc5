// src/update/create.rs

//! Submitting updates and editing their builds

use super::{Caveat, Lifecycle, known_tags};
use crate::db::models::{
    Build, BuildKind, ContentType, Release, TestGatingStatus, Update, UpdateRequest,
    UpdateSeverity, UpdateStatus, UpdateSuggestion, UpdateType, User,
};
use crate::error::{Error, Result};
use crate::notifications::topics;
use chrono::{Datelike, Utc};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything a user supplies when submitting an update
#[derive(Debug, Clone)]
pub struct NewUpdate {
    /// Release name, e.g. "F40"
    pub release: String,
    pub builds: Vec<String>,
    pub content_type: ContentType,
    pub update_type: UpdateType,
    pub severity: UpdateSeverity,
    pub suggest: UpdateSuggestion,
    pub notes: String,
    pub bugs: Vec<i64>,
    pub critpath: bool,
    pub autokarma: bool,
    pub autotime: bool,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<i64>,
    pub request: UpdateRequest,
}

impl NewUpdate {
    pub fn new(release: &str, builds: &[&str]) -> Self {
        Self {
            release: release.to_string(),
            builds: builds.iter().map(|b| b.to_string()).collect(),
            content_type: ContentType::Rpm,
            update_type: UpdateType::Bugfix,
            severity: UpdateSeverity::Unspecified,
            suggest: UpdateSuggestion::Unspecified,
            notes: String::new(),
            bugs: Vec::new(),
            critpath: false,
            autokarma: true,
            autotime: true,
            stable_karma: None,
            unstable_karma: None,
            stable_days: None,
            request: UpdateRequest::Testing,
        }
    }
}

/// A fresh `<ID_PREFIX>-<YEAR>-<10 hex digits>` alias
pub fn generate_alias(release: &Release) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", release.id_prefix, Utc::now().year(), &hex[..10])
}

impl Lifecycle<'_> {
    /// Submit a new update
    ///
    /// The builds must exist in the build system, share a content type and
    /// not belong to another update. The update requests `input.request`
    /// straight away and obsoletes older updates it supersedes.
    pub fn create_update(
        &self,
        input: NewUpdate,
        username: &str,
    ) -> Result<(Update, Vec<Caveat>)> {
        if input.builds.is_empty() {
            return Err(Error::InvalidInput(
                "An update must contain at least one build".to_string(),
            ));
        }

        let release = Release::find_by_name(self.conn, &input.release)?
            .ok_or_else(|| Error::NotFound(format!("release {}", input.release)))?;
        if !release.accepts_updates() {
            return Err(Error::Bodhi(format!(
                "Cannot create updates for {} release {}",
                release.state, release.name
            )));
        }
        let release_id = release
            .id
            .ok_or_else(|| Error::InvalidInput("Release has no id".to_string()))?;

        let mut builds = Vec::new();
        let mut seen_packages = HashSet::new();
        for nvr in &input.builds {
            let build = self.resolve_build(&release, nvr, input.content_type)?;
            if !seen_packages.insert(build.package_name.clone()) {
                return Err(Error::InvalidInput(format!(
                    "Multiple {} builds specified.",
                    build.package_name
                )));
            }
            builds.push(build);
        }

        let mut caveats = Vec::new();
        User::ensure(self.conn, username)?;

        let mut alias = generate_alias(&release);
        while Update::find_by_alias(self.conn, &alias)?.is_some() {
            alias = generate_alias(&release);
        }

        let mut update = Update::new(&alias, release_id, username);
        update.update_type = input.update_type;
        update.severity = input.severity;
        update.suggest = input.suggest;
        update.notes = input.notes;
        update.critpath = input.critpath;
        update.autokarma = input.autokarma;
        update.autotime = input.autotime;
        update.stable_karma = Some(
            input
                .stable_karma
                .unwrap_or(self.config.karma.default_stable_karma),
        );
        update.unstable_karma = Some(
            input
                .unstable_karma
                .unwrap_or(self.config.karma.default_unstable_karma),
        );

        let mandatory_days = self.config.mandatory_days_in_testing(&release);
        let stable_days = input.stable_days.unwrap_or(mandatory_days);
        if stable_days < mandatory_days {
            caveats.push(Caveat::new(
                "stable days",
                format!(
                    "The number of stable days required was set to the mandatory release value \
                     of {} days",
                    mandatory_days
                ),
            ));
        }
        update.stable_days = Some(stable_days.max(mandatory_days));

        if self.config.test_gating.required {
            debug!("Test gating is required, marking {} as waiting", alias);
            update.test_gating_status = Some(TestGatingStatus::Waiting);
        }

        let update_id = update.insert(self.conn)?;
        for mut build in builds {
            build.update_id = Some(update_id);
            if build.id.is_some() {
                build.set_update(self.conn, Some(update_id))?;
            } else {
                build.insert(self.conn)?;
            }
        }
        update.set_bugs(self.conn, &input.bugs)?;
        update.load_relations(self.conn)?;
        info!("Created update {} for {}", update.alias, update.title());

        self.set_request(&mut update, input.request, username)?;
        caveats.extend(self.obsolete_older_updates(&mut update)?);

        Ok((update, caveats))
    }

    /// Replace the builds of `update` with `nvrs`
    ///
    /// Any change resets karma, sends the update back to pending and
    /// requests testing again.
    pub fn edit_builds(
        &self,
        update: &mut Update,
        nvrs: &[String],
        username: &str,
    ) -> Result<Vec<Caveat>> {
        if nvrs.is_empty() {
            return Err(Error::InvalidInput(
                "An update must contain at least one build".to_string(),
            ));
        }

        let current: Vec<String> = update.builds.iter().map(|b| b.nvr.clone()).collect();
        let added: Vec<&String> = nvrs.iter().filter(|n| !current.contains(n)).collect();
        let removed: Vec<&String> = current.iter().filter(|n| !nvrs.contains(n)).collect();

        if update.locked && !added.is_empty() {
            return Err(Error::LockedUpdate(
                "Can't add builds to a locked update".to_string(),
            ));
        }
        if update.locked && !removed.is_empty() {
            return Err(Error::LockedUpdate(
                "Can't remove builds from a locked update".to_string(),
            ));
        }
        if added.is_empty() && removed.is_empty() {
            return Ok(Vec::new());
        }

        let release = self.release_of(update)?;
        let update_id = update.require_id()?;
        let content_type = update.content_type().unwrap_or(ContentType::Rpm);
        let known = known_tags(&Release::list_all(self.conn)?);

        let mut new_builds = Vec::new();
        for nvr in &added {
            new_builds.push(self.resolve_build(&release, nvr, content_type)?);
        }

        for nvr in &removed {
            let Some(mut build) = Build::find_by_nvr(self.conn, nvr)? else {
                continue;
            };
            for tag in self.services.build_system.list_tags(&build.nvr)? {
                if known.contains(&tag) {
                    self.services.build_system.untag_build(&tag, &build.nvr)?;
                }
            }
            self.services
                .build_system
                .tag_build(&release.candidate_tag, &build.nvr)?;
            build.set_update(self.conn, None)?;
        }

        for mut build in new_builds {
            build.update_id = Some(update_id);
            if build.id.is_some() {
                build.set_update(self.conn, Some(update_id))?;
            } else {
                build.insert(self.conn)?;
            }
        }
        update.load_relations(self.conn)?;

        let packages = update.builds.iter().map(|b| &b.package_name);
        let mut seen = HashSet::new();
        for package in packages {
            if !seen.insert(package) {
                return Err(Error::InvalidInput(format!(
                    "Multiple {} builds specified.",
                    package
                )));
            }
        }

        let mut text = format!("{} edited this update.", username);
        if !added.is_empty() {
            text.push_str("\n\nNew build(s):\n");
            for nvr in &added {
                text.push_str(&format!("\n- {}", nvr));
            }
        }
        if !removed.is_empty() {
            text.push_str("\n\nRemoved build(s):\n");
            for nvr in &removed {
                text.push_str(&format!("\n- {}", nvr));
            }
        }
        text.push_str("\n\nKarma has been reset.");
        self.system_comment(update, &text)?;

        let mut caveats = vec![Caveat::new("builds", text)];

        if update.status != UpdateStatus::Pending {
            self.untag(update)?;
            self.add_tag(update, Some(&release.candidate_tag))?;
            update.status = UpdateStatus::Pending;
            caveats.push(Caveat::new(
                "status",
                "Builds changed.  Your update is being sent back to testing.",
            ));
        }

        if let Some(tag) = release.pending_signing_tag.as_deref() {
            for nvr in &added {
                self.services.build_system.tag_build(tag, nvr)?;
            }
        }

        update.date_modified = Some(Utc::now());
        update.save(self.conn)?;
        self.set_request(update, UpdateRequest::Testing, username)?;

        self.publish(topics::UPDATE_EDIT, update, username);
        Ok(caveats)
    }

    /// Load or create the build row for `nvr`, checking it is free to use
    fn resolve_build(
        &self,
        release: &Release,
        nvr: &str,
        content_type: ContentType,
    ) -> Result<Build> {
        let info = self
            .services
            .build_system
            .get_build(nvr)?
            .ok_or_else(|| Error::InvalidInput(format!("Build does not exist: {}", nvr)))?;
        let release_id = release
            .id
            .ok_or_else(|| Error::InvalidInput("Release has no id".to_string()))?;

        let build = match Build::find_by_nvr(self.conn, nvr)? {
            Some(existing) => {
                if existing.update_id.is_some() {
                    return Err(Error::Bodhi(format!("Update for {} already exists", nvr)));
                }
                if existing.release_id != release_id {
                    return Err(Error::InvalidInput(format!(
                        "Build {} does not belong to release {}",
                        nvr, release.name
                    )));
                }
                existing
            }
            None => {
                let kind = match content_type {
                    ContentType::Rpm => BuildKind::Rpm { epoch: info.epoch },
                    ContentType::Module => BuildKind::Module,
                    ContentType::Container => BuildKind::Container,
                    ContentType::Flatpak => BuildKind::Flatpak,
                };
                let mut build = Build::new(nvr, release_id, kind)?;
                build.signed = info.signed;
                build
            }
        };

        if build.content_type() != content_type {
            return Err(Error::InvalidInput(format!(
                "A update cannot contain builds of different content types: {} is {}, not {}",
                nvr,
                build.content_type(),
                content_type
            )));
        }
        Ok(build)
    }
}
