// src/db/models/build.rs

//! Build model
//!
//! One row per build-system artifact. The `nvr` is immutable and unique, and
//! `update_id` links the build to at most one update at a time.

use crate::error::{Error, Result};
use crate::version::{Nvr, RpmVersion};
use rusqlite::{Connection, OptionalExtension, Row, params};

db_enum! {
    /// Content type of a build; all builds of one update share it
    pub enum ContentType {
        Rpm => "rpm",
        Module => "module",
        Container => "container",
        Flatpak => "flatpak",
    }
}

/// Per-content-type build data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Rpm { epoch: u64 },
    Module,
    Container,
    Flatpak,
}

impl BuildKind {
    pub fn content_type(&self) -> ContentType {
        match self {
            BuildKind::Rpm { .. } => ContentType::Rpm,
            BuildKind::Module => ContentType::Module,
            BuildKind::Container => ContentType::Container,
            BuildKind::Flatpak => ContentType::Flatpak,
        }
    }

    pub fn epoch(&self) -> u64 {
        match self {
            BuildKind::Rpm { epoch } => *epoch,
            _ => 0,
        }
    }

    fn from_parts(content_type: ContentType, epoch: u64) -> Self {
        match content_type {
            ContentType::Rpm => BuildKind::Rpm { epoch },
            ContentType::Module => BuildKind::Module,
            ContentType::Container => BuildKind::Container,
            ContentType::Flatpak => BuildKind::Flatpak,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub id: Option<i64>,
    pub nvr: String,
    pub package_name: String,
    pub release_id: i64,
    pub update_id: Option<i64>,
    pub kind: BuildKind,
    pub signed: bool,
}

const COLUMNS: &str = "id, nvr, package_name, release_id, update_id, type, epoch, signed";

impl Build {
    /// Create an unsaved build, deriving the package name from the NVR
    pub fn new(nvr: &str, release_id: i64, kind: BuildKind) -> Result<Self> {
        let parsed = Nvr::parse(nvr)?;
        let package_name = match kind {
            // Modules are packaged per stream: name-stream-version.context
            BuildKind::Module => format!("{}:{}", parsed.name, parsed.version),
            _ => parsed.name,
        };

        Ok(Self {
            id: None,
            nvr: nvr.to_string(),
            package_name,
            release_id,
            update_id: None,
            kind,
            signed: false,
        })
    }

    pub fn content_type(&self) -> ContentType {
        self.kind.content_type()
    }

    /// Name, version and release of this build
    pub fn n_v_r(&self) -> Result<Nvr> {
        Nvr::parse(&self.nvr)
    }

    /// Version label used to order builds of the same package
    pub fn label(&self) -> Result<RpmVersion> {
        Ok(self.n_v_r()?.label(self.kind.epoch()))
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO builds (nvr, package_name, release_id, update_id, type, epoch, signed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.nvr,
                &self.package_name,
                self.release_id,
                self.update_id,
                self.content_type(),
                self.kind.epoch() as i64,
                self.signed,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_nvr(conn: &Connection, nvr: &str) -> Result<Option<Self>> {
        let sql = format!("SELECT {} FROM builds WHERE nvr = ?1", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let build = stmt.query_row([nvr], Self::from_row).optional()?;
        Ok(build)
    }

    /// Builds of an update, in NVR order
    pub fn find_by_update(conn: &Connection, update_id: i64) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM builds WHERE update_id = ?1 ORDER BY nvr",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map([update_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(builds)
    }

    /// Builds of `package_name` on a release that belong to some update
    pub fn find_by_package(
        conn: &Connection,
        release_id: i64,
        package_name: &str,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM builds
             WHERE release_id = ?1 AND package_name = ?2 AND update_id IS NOT NULL
             ORDER BY id",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map(params![release_id, package_name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(builds)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let sql = format!("SELECT {} FROM builds ORDER BY nvr", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let builds = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(builds)
    }

    /// Attach to (or detach from) an update
    pub fn set_update(&mut self, conn: &Connection, update_id: Option<i64>) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE builds SET update_id = ?1 WHERE id = ?2",
            params![update_id, id],
        )?;
        self.update_id = update_id;
        Ok(())
    }

    pub fn set_signed(&mut self, conn: &Connection, signed: bool) -> Result<()> {
        let id = self.require_id()?;
        conn.execute(
            "UPDATE builds SET signed = ?1 WHERE id = ?2",
            params![signed, id],
        )?;
        self.signed = signed;
        Ok(())
    }

    fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| {
            Error::InvalidInput(format!("Build {} has not been saved", self.nvr))
        })
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let content_type: ContentType = row.get(5)?;
        let epoch: i64 = row.get(6)?;
        Ok(Self {
            id: Some(row.get(0)?),
            nvr: row.get(1)?,
            package_name: row.get(2)?,
            release_id: row.get(3)?,
            update_id: row.get(4)?,
            kind: BuildKind::from_parts(content_type, epoch.max(0) as u64),
            signed: row.get(7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Release;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection, i64) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        schema::migrate(&conn).unwrap();
        let release_id = Release::new("F40", "Fedora 40", "40", "FEDORA")
            .insert(&conn)
            .unwrap();
        (temp_file, conn, release_id)
    }

    #[test]
    fn test_build_package_name() {
        let b = Build::new("python-requests-2.31.0-1.fc40", 1, BuildKind::Rpm { epoch: 0 })
            .unwrap();
        assert_eq!(b.package_name, "python-requests");

        let m = Build::new("nodejs-20-4020240101.abcdef12", 1, BuildKind::Module).unwrap();
        assert_eq!(m.package_name, "nodejs:20");
        assert_eq!(m.content_type(), ContentType::Module);

        assert!(Build::new("broken", 1, BuildKind::Container).is_err());
    }

    #[test]
    fn test_build_label_uses_epoch() {
        let b = Build::new("foo-1.0-1.fc40", 1, BuildKind::Rpm { epoch: 2 }).unwrap();
        assert_eq!(b.label().unwrap().to_string(), "2:1.0-1.fc40");
    }

    #[test]
    fn test_build_crud() {
        let (_temp, conn, release_id) = create_test_db();

        let mut b = Build::new("foo-1.0-1.fc40", release_id, BuildKind::Rpm { epoch: 1 })
            .unwrap();
        b.insert(&conn).unwrap();
        b.set_signed(&conn, true).unwrap();

        let found = Build::find_by_nvr(&conn, "foo-1.0-1.fc40").unwrap().unwrap();
        assert!(found.signed);
        assert_eq!(found.kind, BuildKind::Rpm { epoch: 1 });
        assert_eq!(found.update_id, None);

        let mut dup = Build::new("foo-1.0-1.fc40", release_id, BuildKind::Rpm { epoch: 0 })
            .unwrap();
        assert!(dup.insert(&conn).is_err());
    }
}
