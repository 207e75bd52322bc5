// src/db/mod.rs

//! Database layer for Bodhi
//!
//! All update, build, release and compose state lives in one SQLite file.
//! Several processes (request handlers, compose workers) share it, so every
//! connection gets foreign keys, WAL mode and a busy timeout.

pub mod migrations;
pub mod models;
pub mod paths;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;",
    )?;
    Ok(())
}

/// Create (or upgrade) the database at `db_path`
pub fn init(db_path: &str) -> Result<()> {
    let path = Path::new(db_path);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    info!("Initializing database at {}", db_path);
    let conn = Connection::open(path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;
    Ok(())
}

/// Open an existing database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::NotFound(format!(
            "Database not found at {}; run 'bodhi init' first",
            db_path
        )));
    }

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Run `f` inside a deferred transaction, committing on success
pub fn transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction
///
/// The write lock is taken before `f` reads anything, so two processes
/// grouping updates into composes cannot interleave their reads and writes.
pub fn immediate_transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/bodhi.db");
        let path = path.to_str().unwrap();

        init(path).unwrap();
        let conn = open(path).unwrap();
        let version = schema::get_schema_version(&conn).unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_open_missing_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.db");
        let err = open(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bodhi.db");
        let path = path.to_str().unwrap();
        init(path).unwrap();
        let mut conn = open(path).unwrap();

        let result: Result<()> = transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO users (name, email) VALUES ('alice', NULL)",
                [],
            )?;
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
