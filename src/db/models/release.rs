// src/db/models/release.rs

//! Release model
//!
//! A release carries the build-system tags updates move between and a
//! state that decides whether new updates and composes are accepted.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

db_enum! {
    /// Lifecycle state of a release
    pub enum ReleaseState {
        Disabled => "disabled",
        Pending => "pending",
        Frozen => "frozen",
        Current => "current",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: Option<i64>,
    /// Short name, e.g. "F40"
    pub name: String,
    /// Human name, e.g. "Fedora 40"
    pub long_name: String,
    pub version: String,
    /// Prefix of update aliases, e.g. "FEDORA"
    pub id_prefix: String,
    pub branch: String,
    pub dist_tag: String,
    pub stable_tag: String,
    pub testing_tag: String,
    pub candidate_tag: String,
    pub pending_signing_tag: Option<String>,
    pub pending_testing_tag: Option<String>,
    pub pending_stable_tag: Option<String>,
    pub override_tag: String,
    pub state: ReleaseState,
    /// False for releases whose updates are tagged by a side-tag workflow
    pub composed_by_bodhi: bool,
}

const COLUMNS: &str = "id, name, long_name, version, id_prefix, branch, dist_tag, stable_tag, \
     testing_tag, candidate_tag, pending_signing_tag, pending_testing_tag, pending_stable_tag, \
     override_tag, state, composed_by_bodhi";

impl Release {
    /// Create a release with the conventional tag layout derived from `name`
    ///
    /// `F40` gets `f40-updates`, `f40-updates-testing`, `f40-updates-candidate`
    /// and so on.
    pub fn new(name: &str, long_name: &str, version: &str, id_prefix: &str) -> Self {
        let dist = name.to_lowercase();
        Self {
            id: None,
            name: name.to_string(),
            long_name: long_name.to_string(),
            version: version.to_string(),
            id_prefix: id_prefix.to_string(),
            branch: dist.clone(),
            dist_tag: dist.clone(),
            stable_tag: format!("{}-updates", dist),
            testing_tag: format!("{}-updates-testing", dist),
            candidate_tag: format!("{}-updates-candidate", dist),
            pending_signing_tag: Some(format!("{}-signing-pending", dist)),
            pending_testing_tag: Some(format!("{}-updates-testing-pending", dist)),
            pending_stable_tag: Some(format!("{}-updates-pending", dist)),
            override_tag: format!("{}-override", dist),
            state: ReleaseState::Disabled,
            composed_by_bodhi: true,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO releases (name, long_name, version, id_prefix, branch, dist_tag,
                 stable_tag, testing_tag, candidate_tag, pending_signing_tag,
                 pending_testing_tag, pending_stable_tag, override_tag, state, composed_by_bodhi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                &self.name,
                &self.long_name,
                &self.version,
                &self.id_prefix,
                &self.branch,
                &self.dist_tag,
                &self.stable_tag,
                &self.testing_tag,
                &self.candidate_tag,
                &self.pending_signing_tag,
                &self.pending_testing_tag,
                &self.pending_stable_tag,
                &self.override_tag,
                self.state,
                self.composed_by_bodhi,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let sql = format!("SELECT {} FROM releases WHERE id = ?1", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let release = stmt.query_row([id], Self::from_row).optional()?;
        Ok(release)
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {} FROM releases WHERE name = ?1 COLLATE NOCASE",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let release = stmt.query_row([name], Self::from_row).optional()?;
        Ok(release)
    }

    /// Like [`Release::find_by_id`], but a missing row is an error
    pub fn get(conn: &Connection, id: i64) -> Result<Self> {
        Self::find_by_id(conn, id)?
            .ok_or_else(|| Error::NotFound(format!("release with id {}", id)))
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let sql = format!("SELECT {} FROM releases ORDER BY name", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let releases = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(releases)
    }

    pub fn list_by_states(conn: &Connection, states: &[ReleaseState]) -> Result<Vec<Self>> {
        Ok(Self::list_all(conn)?
            .into_iter()
            .filter(|r| states.contains(&r.state))
            .collect())
    }

    pub fn set_state(&mut self, conn: &Connection, state: ReleaseState) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InvalidInput("Cannot update release without ID".to_string()))?;

        conn.execute(
            "UPDATE releases SET state = ?1 WHERE id = ?2",
            params![state, id],
        )?;
        self.state = state;
        Ok(())
    }

    pub fn is_archived(&self) -> bool {
        self.state == ReleaseState::Archived
    }

    /// Whether new updates may be submitted against this release
    pub fn accepts_updates(&self) -> bool {
        !matches!(self.state, ReleaseState::Disabled | ReleaseState::Archived)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            long_name: row.get(2)?,
            version: row.get(3)?,
            id_prefix: row.get(4)?,
            branch: row.get(5)?,
            dist_tag: row.get(6)?,
            stable_tag: row.get(7)?,
            testing_tag: row.get(8)?,
            candidate_tag: row.get(9)?,
            pending_signing_tag: row.get(10)?,
            pending_testing_tag: row.get(11)?,
            pending_stable_tag: row.get(12)?,
            override_tag: row.get(13)?,
            state: row.get(14)?,
            composed_by_bodhi: row.get(15)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_release_tag_layout() {
        let r = Release::new("F40", "Fedora 40", "40", "FEDORA");
        assert_eq!(r.dist_tag, "f40");
        assert_eq!(r.stable_tag, "f40-updates");
        assert_eq!(r.testing_tag, "f40-updates-testing");
        assert_eq!(r.candidate_tag, "f40-updates-candidate");
        assert_eq!(r.pending_stable_tag.as_deref(), Some("f40-updates-pending"));
    }

    #[test]
    fn test_release_crud() {
        let (_temp, conn) = create_test_db();

        let mut r = Release::new("F40", "Fedora 40", "40", "FEDORA");
        let id = r.insert(&conn).unwrap();

        let found = Release::find_by_name(&conn, "f40").unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert_eq!(found.state, ReleaseState::Disabled);

        r.set_state(&conn, ReleaseState::Current).unwrap();
        let found = Release::get(&conn, id).unwrap();
        assert_eq!(found.state, ReleaseState::Current);
        assert!(found.accepts_updates());

        let current = Release::list_by_states(&conn, &[ReleaseState::Current]).unwrap();
        assert_eq!(current.len(), 1);
        assert!(Release::find_by_id(&conn, 999).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_release_name_rejected() {
        let (_temp, conn) = create_test_db();
        Release::new("F40", "Fedora 40", "40", "FEDORA")
            .insert(&conn)
            .unwrap();
        let mut dup = Release::new("F40", "Fedora 40 again", "40", "FEDORA");
        assert!(dup.insert(&conn).is_err());
    }
}
