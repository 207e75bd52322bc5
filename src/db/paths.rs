// src/db/paths.rs
//! Centralized path derivation for Bodhi directories

use std::path::{Path, PathBuf};

/// Get the directory containing the database
pub fn db_dir(db_path: &str) -> PathBuf {
    Path::new(db_path)
        .parent()
        .unwrap_or(Path::new("/var/lib/bodhi"))
        .to_path_buf()
}

/// Default compose output directory when the config does not name one
pub fn compose_dir(db_path: &str) -> PathBuf {
    std::env::var("BODHI_COMPOSE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| db_dir(db_path).join("composes"))
}

/// Lock file held by the compose worker for its whole run
pub fn worker_lock_path(compose_dir: &Path) -> PathBuf {
    compose_dir.join(".bodhi-composer.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_dir() {
        assert_eq!(
            db_dir("/var/lib/bodhi/bodhi.db"),
            PathBuf::from("/var/lib/bodhi")
        );
    }

    #[test]
    fn test_worker_lock_path() {
        assert_eq!(
            worker_lock_path(Path::new("/srv/composes")),
            PathBuf::from("/srv/composes/.bodhi-composer.lock")
        );
    }
}
