// src/buildsys/mod.rs

//! Build system interface
//!
//! The core only needs a handful of calls: look up a build, see and change
//! its tags. `DevBuildSystem` keeps all of that in memory; it backs the
//! tests and the command line tool, which seeds it from the database.

use crate::db::models::{Build, Release, Update, UpdateStatus};
use crate::error::{Error, Result};
use crate::version::Nvr;
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// What the build system knows about one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub nvr: String,
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: u64,
    pub signed: bool,
}

/// A tag change performed through [`BuildSystem`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    Tag { tag: String, nvr: String },
    Untag { tag: String, nvr: String },
    Move { from: String, to: String, nvr: String },
}

pub trait BuildSystem: Send + Sync {
    fn get_build(&self, nvr: &str) -> Result<Option<BuildInfo>>;

    /// Tags currently applied to `nvr`
    fn list_tags(&self, nvr: &str) -> Result<Vec<String>>;

    /// NVRs carrying `tag`; with `latest`, only the newest build per package
    fn list_tagged(&self, tag: &str, latest: bool) -> Result<Vec<String>>;

    fn tag_build(&self, tag: &str, nvr: &str) -> Result<()>;

    fn untag_build(&self, tag: &str, nvr: &str) -> Result<()>;

    fn move_build(&self, from: &str, to: &str, nvr: &str) -> Result<()> {
        self.untag_build(from, nvr)?;
        self.tag_build(to, nvr)
    }
}

#[derive(Debug, Clone)]
struct DevBuild {
    info: BuildInfo,
    tags: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct DevState {
    builds: HashMap<String, DevBuild>,
    actions: Vec<TagAction>,
}

/// In-memory build system
#[derive(Debug, Default)]
pub struct DevBuildSystem {
    state: Mutex<DevState>,
}

impl DevBuildSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a build with its initial tags
    pub fn add_build(&self, nvr: &str, epoch: u64, signed: bool, tags: &[&str]) -> Result<()> {
        let parsed = Nvr::parse(nvr)?;
        let build = DevBuild {
            info: BuildInfo {
                nvr: nvr.to_string(),
                name: parsed.name,
                version: parsed.version,
                release: parsed.release,
                epoch,
                signed,
            },
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        self.lock()?.builds.insert(nvr.to_string(), build);
        Ok(())
    }

    /// Seed from the database, tagging each build by its update's status
    pub fn from_database(conn: &Connection) -> Result<Self> {
        let dev = Self::new();
        let releases: HashMap<i64, Release> = Release::list_all(conn)?
            .into_iter()
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();

        for build in Build::list_all(conn)? {
            let Some(release) = releases.get(&build.release_id) else {
                continue;
            };
            let status = match build.update_id {
                Some(id) => Update::find_by_id(conn, id)?.map(|u| u.status),
                None => None,
            };
            let tag = match status {
                Some(UpdateStatus::Testing) => release.testing_tag.as_str(),
                Some(UpdateStatus::Stable) => release.stable_tag.as_str(),
                _ => release.candidate_tag.as_str(),
            };
            dev.add_build(&build.nvr, build.kind.epoch(), build.signed, &[tag])?;
        }

        debug!("Seeded development build system from database");
        Ok(dev)
    }

    /// Every tag change made so far, in order
    pub fn actions(&self) -> Vec<TagAction> {
        self.state
            .lock()
            .map(|s| s.actions.clone())
            .unwrap_or_default()
    }

    pub fn set_signed(&self, nvr: &str, signed: bool) -> Result<()> {
        let mut state = self.lock()?;
        let build = state
            .builds
            .get_mut(nvr)
            .ok_or_else(|| Error::NotFound(format!("build {}", nvr)))?;
        build.info.signed = signed;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DevState>> {
        self.state.lock().map_err(|_| Error::ServiceUnavailable {
            service: "build system".to_string(),
            message: "state lock poisoned".to_string(),
        })
    }
}

impl BuildSystem for DevBuildSystem {
    fn get_build(&self, nvr: &str) -> Result<Option<BuildInfo>> {
        Ok(self.lock()?.builds.get(nvr).map(|b| b.info.clone()))
    }

    fn list_tags(&self, nvr: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .builds
            .get(nvr)
            .map(|b| b.tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn list_tagged(&self, tag: &str, latest: bool) -> Result<Vec<String>> {
        let state = self.lock()?;
        let mut tagged: Vec<&DevBuild> = state
            .builds
            .values()
            .filter(|b| b.tags.contains(tag))
            .collect();
        tagged.sort_by(|a, b| a.info.nvr.cmp(&b.info.nvr));

        if !latest {
            return Ok(tagged.iter().map(|b| b.info.nvr.clone()).collect());
        }

        let mut newest: HashMap<&str, &DevBuild> = HashMap::new();
        for build in tagged {
            let label = Nvr::parse(&build.info.nvr)?.label(build.info.epoch);
            let replace = match newest.get(build.info.name.as_str()) {
                Some(current) => Nvr::parse(&current.info.nvr)?.label(current.info.epoch) < label,
                None => true,
            };
            if replace {
                newest.insert(build.info.name.as_str(), build);
            }
        }
        let mut nvrs: Vec<String> = newest.values().map(|b| b.info.nvr.clone()).collect();
        nvrs.sort();
        Ok(nvrs)
    }

    fn tag_build(&self, tag: &str, nvr: &str) -> Result<()> {
        let mut state = self.lock()?;
        let build = state
            .builds
            .get_mut(nvr)
            .ok_or_else(|| Error::NotFound(format!("build {}", nvr)))?;
        build.tags.insert(tag.to_string());
        state.actions.push(TagAction::Tag {
            tag: tag.to_string(),
            nvr: nvr.to_string(),
        });
        Ok(())
    }

    fn untag_build(&self, tag: &str, nvr: &str) -> Result<()> {
        let mut state = self.lock()?;
        let build = state
            .builds
            .get_mut(nvr)
            .ok_or_else(|| Error::NotFound(format!("build {}", nvr)))?;
        build.tags.remove(tag);
        state.actions.push(TagAction::Untag {
            tag: tag.to_string(),
            nvr: nvr.to_string(),
        });
        Ok(())
    }

    fn move_build(&self, from: &str, to: &str, nvr: &str) -> Result<()> {
        let mut state = self.lock()?;
        let build = state
            .builds
            .get_mut(nvr)
            .ok_or_else(|| Error::NotFound(format!("build {}", nvr)))?;
        build.tags.remove(from);
        build.tags.insert(to.to_string());
        state.actions.push(TagAction::Move {
            from: from.to_string(),
            to: to.to_string(),
            nvr: nvr.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_build_system_tags() {
        let koji = DevBuildSystem::new();
        koji.add_build("foo-1.0-1.fc40", 0, true, &["f40-updates-candidate"])
            .unwrap();
        koji.add_build("foo-1.0-2.fc40", 0, false, &["f40-updates-candidate"])
            .unwrap();

        koji.move_build("f40-updates-candidate", "f40-updates-testing", "foo-1.0-1.fc40")
            .unwrap();
        assert_eq!(
            koji.list_tags("foo-1.0-1.fc40").unwrap(),
            vec!["f40-updates-testing"]
        );
        assert_eq!(
            koji.list_tagged("f40-updates-candidate", false).unwrap(),
            vec!["foo-1.0-2.fc40"]
        );
        assert_eq!(koji.actions().len(), 1);

        let info = koji.get_build("foo-1.0-2.fc40").unwrap().unwrap();
        assert!(!info.signed);
        assert!(koji.get_build("bar-1-1").unwrap().is_none());
        assert!(koji.tag_build("x", "bar-1-1").is_err());
    }

    #[test]
    fn test_list_tagged_latest() {
        let koji = DevBuildSystem::new();
        koji.add_build("foo-1.0-1.fc40", 0, true, &["t"]).unwrap();
        koji.add_build("foo-1.10-1.fc40", 0, true, &["t"]).unwrap();
        koji.add_build("foo-1.9-1.fc40", 0, true, &["t"]).unwrap();
        koji.add_build("bar-2-1", 0, true, &["t"]).unwrap();

        assert_eq!(
            koji.list_tagged("t", true).unwrap(),
            vec!["bar-2-1", "foo-1.10-1.fc40"]
        );
    }
}
