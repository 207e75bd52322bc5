// src/compose/backend.rs

//! Repository generation steps of a compose
//!
//! The composer drives these phases and checkpoints each one; how a
//! repository is actually produced lives behind [`ComposeBackend`].
//! `StagingBackend` writes a directory per compose holding JSON manifests in
//! place of real repository metadata.

use crate::db::models::{Release, Update, UpdateRequest};
use crate::error::Result;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything a backend needs to know about one compose run
#[derive(Debug, Clone)]
pub struct ComposeJob {
    /// Stable across resumes, e.g. "F40-stable-20240501.120000"
    pub id: String,
    pub release: Release,
    pub request: UpdateRequest,
    pub updates: Vec<Update>,
}

pub trait ComposeBackend: Send + Sync {
    fn generate_updateinfo(&self, job: &ComposeJob) -> Result<()>;

    /// Build the repository and return where it was written
    fn compose_repo(&self, job: &ComposeJob) -> Result<PathBuf>;

    fn sign_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()>;

    fn sync_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()>;

    /// Remove output of earlier composes for the same release and request
    fn clean_old_composes(&self, _job: &ComposeJob) -> Result<()> {
        Ok(())
    }
}

/// Writes composes under a local directory
#[derive(Debug, Clone)]
pub struct StagingBackend {
    root: PathBuf,
    /// Composes kept per release and request when cleaning
    keep: usize,
}

impl StagingBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            keep: 3,
        }
    }

    pub fn job_dir(&self, job: &ComposeJob) -> PathBuf {
        self.root.join(&job.id)
    }

    fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }
}

impl ComposeBackend for StagingBackend {
    fn generate_updateinfo(&self, job: &ComposeJob) -> Result<()> {
        let entries: Vec<_> = job
            .updates
            .iter()
            .map(|u| {
                json!({
                    "id": u.alias,
                    "type": u.update_type.as_str(),
                    "severity": u.severity.as_str(),
                    "title": u.title(),
                    "notes": u.notes,
                    "bugs": u.bugs,
                    "packages": u.builds.iter().map(|b| b.nvr.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();

        let path = self.job_dir(job).join("updateinfo.json");
        Self::write_json(&path, &json!({ "updates": entries }))?;
        debug!("Wrote updateinfo for {} to {}", job.id, path.display());
        Ok(())
    }

    fn compose_repo(&self, job: &ComposeJob) -> Result<PathBuf> {
        let repo = self.job_dir(job).join("repo");
        let mut nvrs: Vec<&str> = job
            .updates
            .iter()
            .flat_map(|u| u.builds.iter().map(|b| b.nvr.as_str()))
            .collect();
        nvrs.sort_unstable();

        Self::write_json(
            &repo.join("manifest.json"),
            &json!({
                "release": job.release.name,
                "request": job.request.as_str(),
                "builds": nvrs,
            }),
        )?;
        info!("Composed {} into {}", job.id, repo.display());
        Ok(repo)
    }

    fn sign_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()> {
        Self::write_json(
            &repo.join("signature.json"),
            &json!({ "compose": job.id, "signed": true }),
        )
    }

    fn sync_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()> {
        let target = self.root.join("published").join(format!(
            "{}-{}",
            job.release.name.to_lowercase(),
            job.request
        ));
        fs::create_dir_all(&target)?;
        fs::copy(repo.join("manifest.json"), target.join("manifest.json"))?;
        info!("Synced {} to {}", job.id, target.display());
        Ok(())
    }

    fn clean_old_composes(&self, job: &ComposeJob) -> Result<()> {
        let prefix = format!("{}-{}-", job.release.name, job.request);
        let mut dirs: Vec<String> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && entry.path().is_dir() {
                dirs.push(name);
            }
        }
        // Ids end in a timestamp, so name order is age order
        dirs.sort();
        let excess = dirs.len().saturating_sub(self.keep);
        for name in dirs.iter().take(excess) {
            info!("Removing old compose {}", name);
            fs::remove_dir_all(self.root.join(name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(id: &str) -> ComposeJob {
        let mut update = Update::new("FEDORA-2024-0000000001", 1, "alice");
        update.builds = vec![
            crate::db::models::Build::new(
                "foo-1.0-1.fc40",
                1,
                crate::db::models::BuildKind::Rpm { epoch: 0 },
            )
            .unwrap(),
        ];
        ComposeJob {
            id: id.to_string(),
            release: Release::new("F40", "Fedora 40", "40", "FEDORA"),
            request: UpdateRequest::Stable,
            updates: vec![update],
        }
    }

    #[test]
    fn test_staging_phases_write_files() {
        let dir = TempDir::new().unwrap();
        let backend = StagingBackend::new(dir.path());
        let job = job("F40-stable-20240501.120000");

        backend.generate_updateinfo(&job).unwrap();
        let repo = backend.compose_repo(&job).unwrap();
        backend.sign_repo(&job, &repo).unwrap();
        backend.sync_repo(&job, &repo).unwrap();

        let job_dir = backend.job_dir(&job);
        assert!(job_dir.join("updateinfo.json").exists());
        assert!(repo.join("signature.json").exists());
        let manifest = fs::read_to_string(repo.join("manifest.json")).unwrap();
        assert!(manifest.contains("foo-1.0-1.fc40"));
        assert!(dir.path().join("published/f40-stable/manifest.json").exists());
    }

    #[test]
    fn test_clean_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let backend = StagingBackend::new(dir.path());
        for stamp in ["1", "2", "3", "4", "5"] {
            let job = job(&format!("F40-stable-2024050{}.000000", stamp));
            backend.compose_repo(&job).unwrap();
        }
        fs::create_dir_all(dir.path().join("F40-testing-20240101.000000")).unwrap();

        backend
            .clean_old_composes(&job("F40-stable-20240505.000000"))
            .unwrap();

        assert!(!dir.path().join("F40-stable-20240501.000000").exists());
        assert!(!dir.path().join("F40-stable-20240502.000000").exists());
        assert!(dir.path().join("F40-stable-20240503.000000").exists());
        assert!(dir.path().join("F40-stable-20240505.000000").exists());
        assert!(dir.path().join("F40-testing-20240101.000000").exists());
    }
}
