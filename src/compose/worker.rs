// src/compose/worker.rs

//! Compose worker
//!
//! Picks up waiting composes and runs them with bounded concurrency. One
//! worker process runs at a time; it holds an exclusive lock file in the
//! compose directory for its whole run.
//!
//! Each compose job opens its own database connection. The compose key keeps
//! jobs from touching the same updates, so they need no other coordination.

use super::composer::{ComposeOutcome, Composer};
use super::prioritized;
use crate::config::BodhiConfig;
use crate::db;
use crate::db::models::{Compose, ComposeState, UpdateRequest};
use crate::db::paths;
use crate::error::{Error, Result};
use crate::services::Services;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Exclusive lock held by the running worker, released on drop
pub struct WorkerLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl WorkerLock {
    /// Take the lock without blocking
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("Acquired compose worker lock at {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Compose worker lock already held at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of one worker pass
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub completed: Vec<ComposeOutcome>,
    /// `(compose key, error message)` of composes that failed
    pub failed: Vec<(String, String)>,
}

/// States a worker runs without `resume`
const WAITING: &[ComposeState] = &[ComposeState::Requested, ComposeState::Pending];

/// States left behind by an interrupted or failed run
const INTERRUPTED: &[ComposeState] = &[
    ComposeState::Initializing,
    ComposeState::Updateinfo,
    ComposeState::Punging,
    ComposeState::SigningRepo,
    ComposeState::SyncingRepo,
    ComposeState::Notifying,
    ComposeState::Cleaning,
    ComposeState::Failed,
];

/// Run every waiting compose of the database at `db_path`
///
/// Requested composes are acknowledged as pending, then all of them run in
/// priority order on a pool of `compose.max_concurrent` threads. With
/// `resume`, interrupted and failed composes run again too, skipping their
/// checkpointed phases.
pub fn run_waiting(
    db_path: &str,
    config: &BodhiConfig,
    services: &Services,
    resume: bool,
) -> Result<WorkerReport> {
    let lock_path = paths::worker_lock_path(&config.compose_dir(db_path));
    let Some(lock) = WorkerLock::try_acquire(&lock_path)? else {
        return Err(Error::WorkerBusy(lock_path.display().to_string()));
    };

    let mut conn = db::open(db_path)?;
    let composes = db::transaction(&mut conn, |tx| {
        let mut composes = Compose::list_by_states(tx, WAITING)?;
        let interrupted = Compose::list_by_states(tx, INTERRUPTED)?;
        if resume {
            composes.extend(interrupted);
        } else if !interrupted.is_empty() {
            warn!(
                "{} compose(s) were interrupted or failed; run with --resume to retry them",
                interrupted.len()
            );
        }

        for compose in composes.iter_mut() {
            if compose.state == ComposeState::Requested {
                compose.set_state(tx, ComposeState::Pending)?;
            }
        }
        prioritized(tx, composes)
    })?;
    drop(conn);

    if composes.is_empty() {
        info!("No composes waiting");
        return Ok(WorkerReport::default());
    }

    let threads = config.compose.max_concurrent.max(1);
    info!(
        "Running {} compose(s) on {} thread(s)",
        composes.len(),
        threads
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("bodhi-compose-{}", i))
        .build()
        .map_err(|e| Error::Config(format!("Cannot start compose workers: {}", e)))?;

    let keys: Vec<(i64, UpdateRequest)> = composes
        .iter()
        .map(|c| (c.release_id, c.request))
        .collect();
    let (sender, receiver) = mpsc::channel();

    // FIFO spawning starts jobs in priority order
    pool.scope_fifo(|scope| {
        for (position, (release_id, request)) in keys.iter().copied().enumerate() {
            let sender = sender.clone();
            scope.spawn_fifo(move |_| {
                let result = run_one(db_path, config, services, release_id, request);
                let _ = sender.send((position, release_id, request, result));
            });
        }
    });
    drop(sender);

    let mut results: Vec<_> = receiver.into_iter().collect();
    results.sort_by_key(|(position, ..)| *position);

    let mut report = WorkerReport::default();
    for (_, release_id, request, result) in results {
        match result {
            Ok(outcome) => report.completed.push(outcome),
            Err(e) => {
                error!("Compose {}/{} failed: {}", release_id, request, e);
                report
                    .failed
                    .push((format!("{}/{}", release_id, request), e.to_string()));
            }
        }
    }

    debug!("Releasing worker lock {}", lock.path().display());
    Ok(report)
}

/// Run one compose on its own connection
fn run_one(
    db_path: &str,
    config: &BodhiConfig,
    services: &Services,
    release_id: i64,
    request: UpdateRequest,
) -> Result<ComposeOutcome> {
    let mut conn = db::open(db_path)?;
    Composer::new(&mut conn, config, services).run(release_id, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_worker_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks/worker.lock");

        let first = WorkerLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(WorkerLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(WorkerLock::try_acquire(&path).unwrap().is_some());
    }
}
