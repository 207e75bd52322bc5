// src/db/models/compose.rs

//! Compose model
//!
//! A compose row is keyed by `(release_id, request)`; the key itself is the
//! compose lock. Member updates are listed explicitly in `compose_updates`.

use crate::compose::checkpoint::Checkpoints;
use crate::db::models::UpdateRequest;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

db_enum! {
    /// Progress of a compose
    pub enum ComposeState {
        Requested => "requested",
        Pending => "pending",
        Initializing => "initializing",
        Updateinfo => "updateinfo",
        Punging => "punging",
        SigningRepo => "signing_repo",
        SyncingRepo => "syncing_repo",
        Notifying => "notifying",
        Success => "success",
        Failed => "failed",
        Cleaning => "cleaning",
    }
}

impl ComposeState {
    /// Position along the normal forward path
    fn rank(&self) -> u8 {
        match self {
            ComposeState::Requested => 0,
            ComposeState::Pending => 1,
            ComposeState::Initializing => 2,
            ComposeState::Updateinfo => 3,
            ComposeState::Punging => 4,
            ComposeState::SigningRepo => 5,
            ComposeState::SyncingRepo => 6,
            ComposeState::Notifying => 7,
            ComposeState::Cleaning => 8,
            ComposeState::Success => 9,
            ComposeState::Failed => 10,
        }
    }

    /// Success and failed end an attempt; everything else holds the lock
    pub fn is_terminal(&self) -> bool {
        matches!(self, ComposeState::Success | ComposeState::Failed)
    }

    pub fn can_transition_to(&self, next: ComposeState) -> bool {
        use ComposeState::*;

        if *self == next {
            return true;
        }
        match (*self, next) {
            // Retry reuses the row
            (Failed, Requested | Pending | Initializing) => true,
            (Failed, _) => false,
            (Success, Cleaning) => true,
            (Success, _) => false,
            (_, Failed) => true,
            // Resume restarts from initializing and skips checkpointed phases
            (_, Initializing) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compose {
    pub release_id: i64,
    pub request: UpdateRequest,
    pub state: ComposeState,
    pub checkpoints: Checkpoints,
    pub error_message: Option<String>,
    pub date_created: DateTime<Utc>,
    pub state_date: DateTime<Utc>,
}

const COLUMNS: &str =
    "release_id, request, state, checkpoints, error_message, date_created, state_date";

impl Compose {
    pub fn new(release_id: i64, request: UpdateRequest) -> Self {
        let now = Utc::now();
        Self {
            release_id,
            request,
            state: ComposeState::Requested,
            checkpoints: Checkpoints::new(),
            error_message: None,
            date_created: now,
            state_date: now,
        }
    }

    /// Insert the row; a second row for the same key violates the primary key
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO composes (release_id, request, state, checkpoints, error_message,
                 date_created, state_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.release_id,
                self.request,
                self.state,
                self.checkpoints.to_json()?,
                &self.error_message,
                self.date_created,
                self.state_date,
            ],
        )?;
        Ok(())
    }

    pub fn find(
        conn: &Connection,
        release_id: i64,
        request: UpdateRequest,
    ) -> Result<Option<Self>> {
        let sql = format!(
            "SELECT {} FROM composes WHERE release_id = ?1 AND request = ?2",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let compose = stmt
            .query_row(params![release_id, request], Self::from_row)
            .optional()?;
        Ok(compose)
    }

    pub fn get(conn: &Connection, release_id: i64, request: UpdateRequest) -> Result<Self> {
        Self::find(conn, release_id, request)?.ok_or_else(|| {
            Error::NotFound(format!("compose for release {} {}", release_id, request))
        })
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM composes ORDER BY date_created, release_id, request",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let composes = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(composes)
    }

    pub fn list_by_states(conn: &Connection, states: &[ComposeState]) -> Result<Vec<Self>> {
        Ok(Self::list_all(conn)?
            .into_iter()
            .filter(|c| states.contains(&c.state))
            .collect())
    }

    /// Move to `next`, stamping `state_date` when the state actually changes
    pub fn set_state(&mut self, conn: &Connection, next: ComposeState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                entity: format!("compose {}", self.key_string()),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state == next {
            return Ok(());
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE composes SET state = ?1, state_date = ?2 WHERE release_id = ?3 AND request = ?4",
            params![next, now, self.release_id, self.request],
        )?;
        debug!(
            "Compose {} state {} -> {}",
            self.key_string(),
            self.state,
            next
        );
        self.state = next;
        self.state_date = now;
        Ok(())
    }

    pub fn save_checkpoints(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE composes SET checkpoints = ?1 WHERE release_id = ?2 AND request = ?3",
            params![self.checkpoints.to_json()?, self.release_id, self.request],
        )?;
        Ok(())
    }

    /// Record `message` and mark the compose failed
    pub fn fail(&mut self, conn: &Connection, message: &str) -> Result<()> {
        conn.execute(
            "UPDATE composes SET error_message = ?1 WHERE release_id = ?2 AND request = ?3",
            params![message, self.release_id, self.request],
        )?;
        self.error_message = Some(message.to_string());
        self.set_state(conn, ComposeState::Failed)
    }

    /// Clear the error message, e.g. when a failed compose is retried
    pub fn clear_error(&mut self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE composes SET error_message = NULL WHERE release_id = ?1 AND request = ?2",
            params![self.release_id, self.request],
        )?;
        self.error_message = None;
        Ok(())
    }

    /// Delete the row; membership rows go with it
    pub fn delete(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "DELETE FROM composes WHERE release_id = ?1 AND request = ?2",
            params![self.release_id, self.request],
        )?;
        Ok(())
    }

    pub fn add_member(&self, conn: &Connection, update_id: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO compose_updates (release_id, request, update_id) VALUES (?1, ?2, ?3)",
            params![self.release_id, self.request, update_id],
        )?;
        Ok(())
    }

    pub fn remove_member(&self, conn: &Connection, update_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM compose_updates WHERE release_id = ?1 AND request = ?2 AND update_id = ?3",
            params![self.release_id, self.request, update_id],
        )?;
        Ok(())
    }

    /// Ids of member updates, in the order they joined
    pub fn member_ids(&self, conn: &Connection) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT update_id FROM compose_updates
             WHERE release_id = ?1 AND request = ?2 ORDER BY rowid",
        )?;
        let ids = stmt
            .query_map(params![self.release_id, self.request], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// The compose key an update belongs to, if any
    pub fn key_of_update(
        conn: &Connection,
        update_id: i64,
    ) -> Result<Option<(i64, UpdateRequest)>> {
        let key = conn
            .query_row(
                "SELECT release_id, request FROM compose_updates WHERE update_id = ?1",
                [update_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(key)
    }

    fn key_string(&self) -> String {
        format!("{}/{}", self.release_id, self.request)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let checkpoints: String = row.get(3)?;
        let checkpoints = Checkpoints::parse(&checkpoints).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                )),
            )
        })?;

        Ok(Self {
            release_id: row.get(0)?,
            request: row.get(1)?,
            state: row.get(2)?,
            checkpoints,
            error_message: row.get(4)?,
            date_created: row.get(5)?,
            state_date: row.get(6)?,
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
    fn test_state_transitions() {
        use ComposeState::*;

        assert!(Requested.can_transition_to(Pending));
        assert!(Initializing.can_transition_to(Punging));
        assert!(Initializing.can_transition_to(Notifying));
        assert!(Notifying.can_transition_to(Cleaning));
        assert!(Cleaning.can_transition_to(Success));
        assert!(Success.can_transition_to(Cleaning));
        assert!(Punging.can_transition_to(Failed));
        assert!(Punging.can_transition_to(Initializing));
        assert!(Failed.can_transition_to(Requested));
        assert!(Failed.can_transition_to(Initializing));

        assert!(!Punging.can_transition_to(Updateinfo));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Success));
        assert!(!Success.can_transition_to(Requested));

        assert!(Success.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Cleaning.is_terminal());
    }

    #[test]
    fn test_compose_key_is_unique() {
        let (_temp, conn, release_id) = create_test_db();

        Compose::new(release_id, UpdateRequest::Stable)
            .insert(&conn)
            .unwrap();
        Compose::new(release_id, UpdateRequest::Testing)
            .insert(&conn)
            .unwrap();

        let err = Compose::new(release_id, UpdateRequest::Stable)
            .insert(&conn)
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(Compose::list_all(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_set_state_and_fail() {
        let (_temp, conn, release_id) = create_test_db();
        let mut compose = Compose::new(release_id, UpdateRequest::Testing);
        compose.insert(&conn).unwrap();

        compose.set_state(&conn, ComposeState::Initializing).unwrap();
        compose.checkpoints.mark_done("updateinfo");
        compose.save_checkpoints(&conn).unwrap();
        compose.fail(&conn, "pungi exploded").unwrap();

        let stored = Compose::get(&conn, release_id, UpdateRequest::Testing).unwrap();
        assert_eq!(stored.state, ComposeState::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("pungi exploded"));
        assert!(stored.checkpoints.is_done("updateinfo"));

        let err = compose.set_state(&conn, ComposeState::Success).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }
}
