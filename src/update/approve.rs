// src/update/approve.rs

//! Periodic approval of updates that have been in testing long enough

use super::Lifecycle;
use crate::config::BodhiConfig;
use crate::db::{self, models::{Update, UpdateFilter, UpdateRequest, UpdateStatus}};
use crate::error::Result;
use crate::karma;
use crate::notifications::topics;
use crate::services::Services;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// What an approval pass did with one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Testing requirements are not met yet
    NotReady,
    /// The maintainer was told the update may go stable
    Approved,
    /// Stable was requested because autotime reached `stable_days`
    Autopushed,
}

impl Lifecycle<'_> {
    /// Approve a testing update that has no request and meets its requirements
    ///
    /// Sets `date_approved` the first time. With autotime on and `stable_days`
    /// spent in testing, stable is requested on behalf of the system user;
    /// otherwise a one-time comment says the update can be pushed.
    pub fn approve_testing(&self, update: &mut Update) -> Result<Approval> {
        if update.status != UpdateStatus::Testing || update.request.is_some() || update.locked {
            return Ok(Approval::NotReady);
        }
        if !self.meets_testing_requirements(update)? {
            info!("{} has not met testing requirements", update.alias);
            return Ok(Approval::NotReady);
        }

        let now = Utc::now();
        info!("{} now meets testing requirements", update.alias);
        if update.date_approved.is_none() {
            update.date_approved = Some(now);
            update.save(self.conn)?;
        }

        let tally = self.tally(update)?;
        let system = self.config.system_user();
        let stable_days = update.stable_days.unwrap_or(0);

        if update.autotime && karma::days_in_testing(update.date_testing, now) >= stable_days {
            if !tally.has_stable_comment {
                self.publish(topics::UPDATE_REQUIREMENTS_MET, update, system);
            }
            info!("Automatically marking {} as stable", update.alias);
            self.set_request(update, UpdateRequest::Stable, system)?;
            return Ok(Approval::Autopushed);
        }

        if tally.has_stable_comment {
            debug!("{} already has its approval comment", update.alias);
            return Ok(Approval::Approved);
        }
        let text = self
            .config
            .messages
            .testing_approval_days
            .replace("%d", &stable_days.to_string());
        self.system_comment(update, &text)?;
        self.publish(topics::UPDATE_REQUIREMENTS_MET, update, system);
        Ok(Approval::Approved)
    }
}

/// Run [`Lifecycle::approve_testing`] over every testing update
///
/// Each update gets its own transaction; one failing update is logged and
/// does not stop the others.
pub fn approve_testing_updates(
    conn: &mut Connection,
    config: &BodhiConfig,
    services: &Services,
) -> Result<Vec<(String, Approval)>> {
    let filter = UpdateFilter {
        status: Some(UpdateStatus::Testing),
        ..Default::default()
    };
    let updates = Update::list(conn, &filter)?;

    let mut results = Vec::new();
    for mut update in updates.into_iter().filter(|u| u.request.is_none()) {
        let alias = update.alias.clone();
        match db::transaction(conn, |tx| {
            Lifecycle::new(tx, config, services).approve_testing(&mut update)
        }) {
            Ok(approval) => results.push((alias, approval)),
            Err(e) => warn!("Could not approve {}: {}", alias, e),
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildsys::DevBuildSystem;
    use crate::db::models::{Comment, Release, ReleaseState};
    use crate::db::schema;
    use crate::update::NewUpdate;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn setup(config: &BodhiConfig) -> (NamedTempFile, Connection, Services) {
        let db = NamedTempFile::new().unwrap();
        let conn = Connection::open(db.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();

        let mut release = Release::new("F40", "Fedora 40", "40", "FEDORA");
        release.state = ReleaseState::Current;
        release.insert(&conn).unwrap();

        let builds = DevBuildSystem::new();
        builds
            .add_build("foo-1.0-1.fc40", 0, true, &["f40-updates-testing"])
            .unwrap();
        let services = Services::local(builds, &config.compose_dir(&db.path().to_string_lossy()));
        (db, conn, services)
    }

    fn testing_update(conn: &Connection, config: &BodhiConfig, services: &Services, days: i64) -> Update {
        let (mut update, _) = Lifecycle::new(conn, config, services)
            .create_update(NewUpdate::new("F40", &["foo-1.0-1.fc40"]), "alice")
            .unwrap();
        update.status = UpdateStatus::Testing;
        update.request = None;
        update.stable_days = Some(7);
        update.date_testing = Some(Utc::now() - Duration::days(days));
        update.save(conn).unwrap();
        update
    }

    #[test]
    fn test_autotime_requests_stable() {
        let config = BodhiConfig::default();
        let (_db, mut conn, services) = setup(&config);
        let update = testing_update(&conn, &config, &services, 8);

        let results = approve_testing_updates(&mut conn, &config, &services).unwrap();
        assert_eq!(results, vec![(update.alias.clone(), Approval::Autopushed)]);

        let stored = Update::get_by_alias(&conn, &update.alias).unwrap();
        assert_eq!(stored.request, Some(UpdateRequest::Stable));
        assert!(stored.date_approved.is_some());
    }

    #[test]
    fn test_approval_comment_posted_once() {
        let config = BodhiConfig::default();
        let (_db, conn, services) = setup(&config);
        let mut update = testing_update(&conn, &config, &services, 2);
        let lifecycle = Lifecycle::new(&conn, &config, &services);

        assert_eq!(lifecycle.approve_testing(&mut update).unwrap(), Approval::Approved);
        assert_eq!(lifecycle.approve_testing(&mut update).unwrap(), Approval::Approved);

        let comments = Comment::find_by_update(&conn, update.id.unwrap()).unwrap();
        let approvals = comments
            .iter()
            .filter(|c| c.text.contains(karma::STABLE_COMMENT_MARKER))
            .count();
        assert_eq!(approvals, 1);
        assert_eq!(update.request, None);
    }

    #[test]
    fn test_not_ready_without_testing_time() {
        let mut config = BodhiConfig::default();
        config.releases.insert(
            "F40".to_string(),
            crate::config::ReleasePolicy {
                mandatory_days_in_testing: Some(7),
                critpath_min_karma: None,
            },
        );
        let (_db, conn, services) = setup(&config);
        let mut update = testing_update(&conn, &config, &services, 1);

        let approval = Lifecycle::new(&conn, &config, &services)
            .approve_testing(&mut update)
            .unwrap();
        assert_eq!(approval, Approval::NotReady);
        assert!(update.date_approved.is_none());
    }
}
