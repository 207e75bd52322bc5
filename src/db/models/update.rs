// src/db/models/update.rs

//! Update model
//!
//! Row-level persistence for updates. Lifecycle rules live in
//! [`crate::update`]; this module only loads and stores state.

use crate::db::models::{Build, ContentType};
use crate::error::{Error, Result};
use crate::gating::UnsatisfiedRequirement;
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

db_enum! {
    /// Where an update currently is
    pub enum UpdateStatus {
        Pending => "pending",
        Testing => "testing",
        Stable => "stable",
        Unpushed => "unpushed",
        Obsolete => "obsolete",
        SideTagActive => "side_tag_active",
        SideTagExpired => "side_tag_expired",
    }
}

db_enum! {
    /// What should happen to an update next
    pub enum UpdateRequest {
        Testing => "testing",
        Stable => "stable",
        Obsolete => "obsolete",
        Unpush => "unpush",
        Revoke => "revoke",
    }
}

db_enum! {
    pub enum UpdateType {
        Bugfix => "bugfix",
        Security => "security",
        NewPackage => "newpackage",
        Enhancement => "enhancement",
        Unspecified => "unspecified",
    }
}

db_enum! {
    pub enum UpdateSeverity {
        Unspecified => "unspecified",
        Urgent => "urgent",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

db_enum! {
    /// What users should do after installing the update
    pub enum UpdateSuggestion {
        Unspecified => "unspecified",
        Reboot => "reboot",
        Logout => "logout",
    }
}

db_enum! {
    /// Outcome of the external test gating decision
    pub enum TestGatingStatus {
        Waiting => "waiting",
        Ignored => "ignored",
        Queued => "queued",
        Running => "running",
        Passed => "passed",
        Failed => "failed",
        GreenwaveFailed => "greenwave_failed",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: Option<i64>,
    /// Immutable public identifier, e.g. FEDORA-2024-0123456789
    pub alias: String,
    pub release_id: i64,
    pub user_name: String,
    pub status: UpdateStatus,
    pub request: Option<UpdateRequest>,
    pub update_type: UpdateType,
    pub severity: UpdateSeverity,
    pub suggest: UpdateSuggestion,
    pub notes: String,
    pub locked: bool,
    pub pushed: bool,
    pub critpath: bool,
    pub autokarma: bool,
    pub autotime: bool,
    pub stable_karma: Option<i32>,
    pub unstable_karma: Option<i32>,
    pub stable_days: Option<i64>,
    pub test_gating_status: Option<TestGatingStatus>,
    pub from_tag: Option<String>,
    pub date_submitted: DateTime<Utc>,
    pub date_modified: Option<DateTime<Utc>>,
    pub date_approved: Option<DateTime<Utc>>,
    pub date_testing: Option<DateTime<Utc>>,
    pub date_stable: Option<DateTime<Utc>>,
    pub date_pushed: Option<DateTime<Utc>>,
    pub date_locked: Option<DateTime<Utc>>,
    pub builds: Vec<Build>,
    pub bugs: Vec<i64>,
}

/// Filters for [`Update::list`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct UpdateFilter {
    pub release_id: Option<i64>,
    pub status: Option<UpdateStatus>,
    pub request: Option<UpdateRequest>,
    pub locked: Option<bool>,
    pub user_name: Option<String>,
    /// Only updates whose request is set
    pub has_request: bool,
}

const COLUMNS: &str = "id, alias, release_id, user_name, status, request, type, severity, \
     suggest, notes, locked, pushed, critpath, autokarma, autotime, stable_karma, \
     unstable_karma, stable_days, test_gating_status, from_tag, date_submitted, date_modified, \
     date_approved, date_testing, date_stable, date_pushed, date_locked";

impl Update {
    pub fn new(alias: &str, release_id: i64, user_name: &str) -> Self {
        Self {
            id: None,
            alias: alias.to_string(),
            release_id,
            user_name: user_name.to_string(),
            status: UpdateStatus::Pending,
            request: None,
            update_type: UpdateType::Unspecified,
            severity: UpdateSeverity::Unspecified,
            suggest: UpdateSuggestion::Unspecified,
            notes: String::new(),
            locked: false,
            pushed: false,
            critpath: false,
            autokarma: true,
            autotime: true,
            stable_karma: None,
            unstable_karma: None,
            stable_days: None,
            test_gating_status: None,
            from_tag: None,
            date_submitted: Utc::now(),
            date_modified: None,
            date_approved: None,
            date_testing: None,
            date_stable: None,
            date_pushed: None,
            date_locked: None,
            builds: Vec::new(),
            bugs: Vec::new(),
        }
    }

    /// Space-separated NVRs of the update's builds
    pub fn title(&self) -> String {
        let mut nvrs: Vec<&str> = self.builds.iter().map(|b| b.nvr.as_str()).collect();
        nvrs.sort_unstable();
        nvrs.join(" ")
    }

    /// Content type shared by the builds, if there are any
    pub fn content_type(&self) -> Option<ContentType> {
        self.builds.first().map(|b| b.content_type())
    }

    /// Package names touched by this update, sorted and deduplicated
    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builds.iter().map(|b| b.package_name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn require_id(&self) -> Result<i64> {
        self.id
            .ok_or_else(|| Error::InvalidInput(format!("Update {} has not been saved", self.alias)))
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO updates (alias, release_id, user_name, status, request, type, severity,
                 suggest, notes, locked, pushed, critpath, autokarma, autotime, stable_karma,
                 unstable_karma, stable_days, test_gating_status, from_tag, date_submitted,
                 date_modified, date_approved, date_testing, date_stable, date_pushed, date_locked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                &self.alias,
                self.release_id,
                &self.user_name,
                self.status,
                self.request,
                self.update_type,
                self.severity,
                self.suggest,
                &self.notes,
                self.locked,
                self.pushed,
                self.critpath,
                self.autokarma,
                self.autotime,
                self.stable_karma,
                self.unstable_karma,
                self.stable_days,
                self.test_gating_status,
                &self.from_tag,
                self.date_submitted,
                self.date_modified,
                self.date_approved,
                self.date_testing,
                self.date_stable,
                self.date_pushed,
                self.date_locked,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Write every mutable column back to the database
    pub fn save(&self, conn: &Connection) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE updates SET status = ?1, request = ?2, type = ?3, severity = ?4,
                 suggest = ?5, notes = ?6, locked = ?7, pushed = ?8, critpath = ?9,
                 autokarma = ?10, autotime = ?11, stable_karma = ?12, unstable_karma = ?13,
                 stable_days = ?14, test_gating_status = ?15, from_tag = ?16,
                 date_modified = ?17, date_approved = ?18, date_testing = ?19,
                 date_stable = ?20, date_pushed = ?21, date_locked = ?22
             WHERE id = ?23",
            params![
                self.status,
                self.request,
                self.update_type,
                self.severity,
                self.suggest,
                &self.notes,
                self.locked,
                self.pushed,
                self.critpath,
                self.autokarma,
                self.autotime,
                self.stable_karma,
                self.unstable_karma,
                self.stable_days,
                self.test_gating_status,
                &self.from_tag,
                self.date_modified,
                self.date_approved,
                self.date_testing,
                self.date_stable,
                self.date_pushed,
                self.date_locked,
                id,
            ],
        )?;
        Ok(())
    }

    /// Replace the bug list
    pub fn set_bugs(&mut self, conn: &Connection, bugs: &[i64]) -> Result<()> {
        let id = self.require_id()?;
        conn.execute("DELETE FROM update_bugs WHERE update_id = ?1", [id])?;
        let mut bugs = bugs.to_vec();
        bugs.sort_unstable();
        bugs.dedup();
        for bug in &bugs {
            conn.execute(
                "INSERT INTO update_bugs (update_id, bug_id) VALUES (?1, ?2)",
                params![id, bug],
            )?;
        }
        self.bugs = bugs;
        Ok(())
    }

    /// Reload builds and bugs from the database
    pub fn load_relations(&mut self, conn: &Connection) -> Result<()> {
        let id = self.require_id()?;
        self.builds = Build::find_by_update(conn, id)?;

        let mut stmt =
            conn.prepare("SELECT bug_id FROM update_bugs WHERE update_id = ?1 ORDER BY bug_id")?;
        self.bugs = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(())
    }

    /// Unmet requirements reported by the last gating decision
    pub fn gating_requirements(&self, conn: &Connection) -> Result<Vec<UnsatisfiedRequirement>> {
        let mut stmt = conn.prepare(
            "SELECT item, testcase, requirement_type, scenario
             FROM update_gating_requirements WHERE update_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map([self.require_id()?], |row| {
                Ok(UnsatisfiedRequirement {
                    item: row.get(0)?,
                    testcase: row.get(1)?,
                    requirement_type: row.get(2)?,
                    scenario: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the stored requirements with `requirements`, kept in order
    pub fn set_gating_requirements(
        &self,
        conn: &Connection,
        requirements: &[UnsatisfiedRequirement],
    ) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "DELETE FROM update_gating_requirements WHERE update_id = ?1",
            [id],
        )?;
        for (position, req) in requirements.iter().enumerate() {
            conn.execute(
                "INSERT INTO update_gating_requirements
                     (update_id, position, item, testcase, requirement_type, scenario)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    position as i64,
                    req.item,
                    req.testcase,
                    req.requirement_type,
                    req.scenario
                ],
            )?;
        }
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {} FROM updates WHERE id = ?1", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let update = stmt.query_row([id], Self::from_row).optional()?;
        Self::with_relations(conn, update)
    }

    pub fn find_by_alias(conn: &Connection, alias: &str) -> Result<Option<Self>> {
        let sql = format!("SELECT {} FROM updates WHERE alias = ?1", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let update = stmt.query_row([alias], Self::from_row).optional()?;
        Self::with_relations(conn, update)
    }

    /// Look up by alias, or by the NVR of one of its builds
    pub fn find_by_alias_or_nvr(conn: &Connection, key: &str) -> Result<Option<Self>> {
        if let Some(update) = Self::find_by_alias(conn, key)? {
            return Ok(Some(update));
        }
        match Build::find_by_nvr(conn, key)?.and_then(|b| b.update_id) {
            Some(update_id) => Self::find_by_id(conn, update_id),
            None => Ok(None),
        }
    }

    /// Like [`Update::find_by_id`], but a missing row is an error
    pub fn get(conn: &Connection, id: i64) -> Result<Self> {
        Self::find_by_id(conn, id)?
            .ok_or_else(|| Error::NotFound(format!("update with id {}", id)))
    }

    pub fn get_by_alias(conn: &Connection, alias: &str) -> Result<Self> {
        Self::find_by_alias_or_nvr(conn, alias)?
            .ok_or_else(|| Error::NotFound(format!("update {}", alias)))
    }

    /// List updates matching `filter`, oldest submission first
    pub fn list(conn: &Connection, filter: &UpdateFilter) -> Result<Vec<Self>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(release_id) = filter.release_id {
            clauses.push("release_id = ?");
            values.push(Box::new(release_id));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Box::new(status));
        }
        if let Some(request) = filter.request {
            clauses.push("request = ?");
            values.push(Box::new(request));
        }
        if let Some(locked) = filter.locked {
            clauses.push("locked = ?");
            values.push(Box::new(locked));
        }
        if let Some(ref user) = filter.user_name {
            clauses.push("user_name = ?");
            values.push(Box::new(user.clone()));
        }
        if filter.has_request {
            clauses.push("request IS NOT NULL");
        }

        let mut sql = format!("SELECT {} FROM updates", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date_submitted, id");

        let mut stmt = conn.prepare(&sql)?;
        let mut updates = stmt
            .query_map(params_from_iter(values.iter()), Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for update in &mut updates {
            update.load_relations(conn)?;
        }
        Ok(updates)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        Self::list(conn, &UpdateFilter::default())
    }

    fn with_relations(conn: &Connection, update: Option<Self>) -> Result<Option<Self>> {
        match update {
            Some(mut u) => {
                u.load_relations(conn)?;
                Ok(Some(u))
            }
            None => Ok(None),
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            alias: row.get(1)?,
            release_id: row.get(2)?,
            user_name: row.get(3)?,
            status: row.get(4)?,
            request: row.get(5)?,
            update_type: row.get(6)?,
            severity: row.get(7)?,
            suggest: row.get(8)?,
            notes: row.get(9)?,
            locked: row.get(10)?,
            pushed: row.get(11)?,
            critpath: row.get(12)?,
            autokarma: row.get(13)?,
            autotime: row.get(14)?,
            stable_karma: row.get(15)?,
            unstable_karma: row.get(16)?,
            stable_days: row.get(17)?,
            test_gating_status: row.get(18)?,
            from_tag: row.get(19)?,
            date_submitted: row.get(20)?,
            date_modified: row.get(21)?,
            date_approved: row.get(22)?,
            date_testing: row.get(23)?,
            date_stable: row.get(24)?,
            date_pushed: row.get(25)?,
            date_locked: row.get(26)?,
            builds: Vec::new(),
            bugs: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{BuildKind, Release};
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection, i64) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        conn.execute("INSERT INTO users (name) VALUES ('alice')", [])
            .unwrap();
        let release_id = Release::new("F40", "Fedora 40", "40", "FEDORA")
            .insert(&conn)
            .unwrap();
        (temp_file, conn, release_id)
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(UpdateStatus::SideTagActive.as_str(), "side_tag_active");
        assert_eq!(
            "greenwave_failed".parse::<TestGatingStatus>().unwrap(),
            TestGatingStatus::GreenwaveFailed
        );
        assert!("bogus".parse::<UpdateRequest>().is_err());
    }

    #[test]
    fn test_update_insert_and_reload() {
        let (_temp, conn, release_id) = create_test_db();

        let mut update = Update::new("FEDORA-2024-0000000001", release_id, "alice");
        update.request = Some(UpdateRequest::Testing);
        update.stable_karma = Some(3);
        update.test_gating_status = Some(TestGatingStatus::Waiting);
        let id = update.insert(&conn).unwrap();

        let mut build = Build::new("foo-1.0-1.fc40", release_id, BuildKind::Rpm { epoch: 0 })
            .unwrap();
        build.update_id = Some(id);
        build.insert(&conn).unwrap();
        update.set_bugs(&conn, &[42, 7, 42]).unwrap();

        let found = Update::get(&conn, id).unwrap();
        assert_eq!(found.request, Some(UpdateRequest::Testing));
        assert_eq!(found.stable_karma, Some(3));
        assert_eq!(found.test_gating_status, Some(TestGatingStatus::Waiting));
        assert_eq!(found.title(), "foo-1.0-1.fc40");
        assert_eq!(found.bugs, vec![7, 42]);
        assert_eq!(found.content_type(), Some(ContentType::Rpm));

        let by_nvr = Update::get_by_alias(&conn, "foo-1.0-1.fc40").unwrap();
        assert_eq!(by_nvr.id, Some(id));
    }

    #[test]
    fn test_update_save_and_filter() {
        let (_temp, conn, release_id) = create_test_db();

        let mut a = Update::new("FEDORA-2024-000000000a", release_id, "alice");
        a.insert(&conn).unwrap();
        let mut b = Update::new("FEDORA-2024-000000000b", release_id, "alice");
        b.insert(&conn).unwrap();

        b.request = Some(UpdateRequest::Stable);
        b.locked = true;
        b.save(&conn).unwrap();

        let requested = Update::list(
            &conn,
            &UpdateFilter {
                has_request: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].alias, b.alias);
        assert!(requested[0].locked);

        let unlocked = Update::list(
            &conn,
            &UpdateFilter {
                release_id: Some(release_id),
                locked: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].alias, a.alias);
    }
}
