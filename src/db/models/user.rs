// src/db/models/user.rs

//! Users and their group memberships

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            email: None,
            groups: Vec::new(),
        }
    }

    /// Insert the user and its groups; existing rows are left alone
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO users (name, email) VALUES (?1, ?2)",
            params![&self.name, &self.email],
        )?;
        for group in &self.groups {
            Self::add_group(conn, &self.name, group)?;
        }
        Ok(())
    }

    /// Make sure a user row exists for `name`
    pub fn ensure(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("INSERT OR IGNORE INTO users (name) VALUES (?1)", [name])?;
        Ok(())
    }

    pub fn add_group(conn: &Connection, name: &str, group: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_name, group_name) VALUES (?1, ?2)",
            [name, group],
        )?;
        Ok(())
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let email: Option<Option<String>> = conn
            .query_row("SELECT email FROM users WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(email) = email else {
            return Ok(None);
        };

        Ok(Some(Self {
            name: name.to_string(),
            email,
            groups: Self::groups_of(conn, name)?,
        }))
    }

    pub fn groups_of(conn: &Connection, name: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT group_name FROM user_groups WHERE user_name = ?1 ORDER BY group_name",
        )?;
        let groups = stmt
            .query_map([name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(groups)
    }

    pub fn in_any_group(&self, groups: &[String]) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use tempfile::NamedTempFile;

    #[test]
    fn test_user_groups() {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();

        let mut user = User::new("alice");
        user.groups = vec!["packager".to_string(), "qa".to_string()];
        user.insert(&conn).unwrap();
        user.insert(&conn).unwrap();

        let found = User::find_by_name(&conn, "alice").unwrap().unwrap();
        assert_eq!(found.groups, vec!["packager", "qa"]);
        assert!(found.in_any_group(&["qa".to_string()]));
        assert!(!found.in_any_group(&["releng".to_string()]));

        assert!(User::find_by_name(&conn, "bob").unwrap().is_none());
    }
}
