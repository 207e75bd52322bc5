// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use bodhi::buildsys::{BuildSystem, DevBuildSystem};
use bodhi::compose::backend::{ComposeBackend, ComposeJob, StagingBackend};
use bodhi::db;
use bodhi::db::models::{Release, ReleaseState, Update};
use bodhi::gating::{Decision, DecisionService, DecisionSubject, MemoryWaivers, UnsatisfiedRequirement};
use bodhi::notifications::MemoryBus;
use bodhi::update::{NewComment, NewUpdate};
use bodhi::{BodhiConfig, Lifecycle, Result, Services};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Decision service answering with whatever decision the test scripted
#[derive(Debug)]
pub struct ScriptedDecisions {
    decision: Mutex<Decision>,
}

impl ScriptedDecisions {
    pub fn new() -> Self {
        Self {
            decision: Mutex::new(Decision::no_policies()),
        }
    }

    pub fn set(&self, decision: Decision) {
        *self.decision.lock().unwrap() = decision;
    }

    /// A decision failing `testcase` for `item`
    pub fn fail(&self, item: &str, testcase: &str) {
        self.set(Decision {
            policies_satisfied: false,
            summary: "1 of 1 required tests failed".to_string(),
            applicable_policies: vec!["bodhiupdate_bodhipush_openqa".to_string()],
            unsatisfied_requirements: vec![UnsatisfiedRequirement {
                item: item.to_string(),
                testcase: testcase.to_string(),
                requirement_type: "test-result-failed".to_string(),
                scenario: None,
            }],
        });
    }
}

impl DecisionService for ScriptedDecisions {
    fn query_decision(&self, _subject: &DecisionSubject, _timeout: Duration) -> Result<Decision> {
        Ok(self.decision.lock().unwrap().clone())
    }
}

/// Staging backend that records each phase it runs and can be made to fail
#[derive(Debug)]
pub struct RecordingBackend {
    inner: StagingBackend,
    calls: Mutex<Vec<&'static str>>,
    fail_on: Mutex<Option<&'static str>>,
    panic_on: Mutex<Option<&'static str>>,
}

impl RecordingBackend {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: StagingBackend::new(root),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            panic_on: Mutex::new(None),
        }
    }

    /// Make `phase` fail until [`RecordingBackend::recover`] is called
    pub fn fail_on(&self, phase: &'static str) {
        *self.fail_on.lock().unwrap() = Some(phase);
    }

    /// Make `phase` panic, like a worker process dying mid-run
    pub fn panic_on(&self, phase: &'static str) {
        *self.panic_on.lock().unwrap() = Some(phase);
    }

    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
        *self.panic_on.lock().unwrap() = None;
    }

    pub fn count(&self, phase: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == phase)
            .count()
    }

    fn record(&self, phase: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(phase);
        let panics = *self.panic_on.lock().unwrap() == Some(phase);
        if panics {
            panic!("{} died", phase);
        }
        let fails = *self.fail_on.lock().unwrap() == Some(phase);
        if fails {
            return Err(bodhi::Error::Io(std::io::Error::other(format!(
                "{} crashed",
                phase
            ))));
        }
        Ok(())
    }
}

impl ComposeBackend for RecordingBackend {
    fn generate_updateinfo(&self, job: &ComposeJob) -> Result<()> {
        self.record("updateinfo")?;
        self.inner.generate_updateinfo(job)
    }

    fn compose_repo(&self, job: &ComposeJob) -> Result<PathBuf> {
        self.record("compose_repo")?;
        self.inner.compose_repo(job)
    }

    fn sign_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()> {
        self.record("sign_repo")?;
        self.inner.sign_repo(job, repo)
    }

    fn sync_repo(&self, job: &ComposeJob, repo: &Path) -> Result<()> {
        self.record("sync_repo")?;
        self.inner.sync_repo(job, repo)
    }

    fn clean_old_composes(&self, job: &ComposeJob) -> Result<()> {
        self.record("clean")?;
        self.inner.clean_old_composes(job)
    }
}

/// A database with an F40 release plus recording services around it
pub struct TestEnv {
    pub dir: TempDir,
    pub db_path: String,
    pub conn: Connection,
    pub config: BodhiConfig,
    pub services: Services,
    pub builds: Arc<DevBuildSystem>,
    pub bus: Arc<MemoryBus>,
    pub decisions: Arc<ScriptedDecisions>,
    pub waivers: Arc<MemoryWaivers>,
    pub backend: Arc<RecordingBackend>,
    pub release_id: i64,
}

/// Create a test environment with the default configuration
pub fn setup() -> TestEnv {
    setup_with(BodhiConfig::default())
}

pub fn setup_with(mut config: BodhiConfig) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bodhi.db").to_str().unwrap().to_string();
    db::init(&db_path).unwrap();
    let conn = db::open(&db_path).unwrap();

    let compose_dir = dir.path().join("composes");
    config.compose.compose_dir = Some(compose_dir.clone());

    let mut release = Release::new("F40", "Fedora 40", "40", "FEDORA");
    release.state = ReleaseState::Current;
    let release_id = release.insert(&conn).unwrap();

    let builds = Arc::new(DevBuildSystem::new());
    let bus = Arc::new(MemoryBus::new());
    let decisions = Arc::new(ScriptedDecisions::new());
    let waivers = Arc::new(MemoryWaivers::new());
    let backend = Arc::new(RecordingBackend::new(&compose_dir));
    let services = Services::new(
        builds.clone(),
        decisions.clone(),
        waivers.clone(),
        bus.clone(),
        backend.clone(),
    );

    TestEnv {
        dir,
        db_path,
        conn,
        config,
        services,
        builds,
        bus,
        decisions,
        waivers,
        backend,
        release_id,
    }
}

impl TestEnv {
    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(&self.conn, &self.config, &self.services)
    }

    /// Add another release in the given state
    pub fn add_release(&self, name: &str, version: &str, state: ReleaseState) -> i64 {
        let mut release = Release::new(name, &format!("Fedora {}", version), version, "FEDORA");
        release.state = state;
        release.insert(&self.conn).unwrap()
    }

    /// Register a build in the build system's candidate tag
    pub fn add_build(&self, nvr: &str, signed: bool) {
        self.builds
            .add_build(nvr, 0, signed, &["f40-updates-candidate"])
            .unwrap();
    }

    /// Submit a signed update of `nvrs` to testing as `user`
    pub fn submit(&self, nvrs: &[&str], user: &str) -> Update {
        for nvr in nvrs {
            self.add_build(nvr, true);
        }
        self.submit_existing(nvrs, user)
    }

    /// Submit an update of builds already in the build system
    pub fn submit_existing(&self, nvrs: &[&str], user: &str) -> Update {
        let (update, _caveats) = self
            .lifecycle()
            .create_update(NewUpdate::new("F40", nvrs), user)
            .unwrap();
        update
    }

    /// Submit an update and pretend a compose already pushed it to testing
    pub fn submit_testing(&self, nvrs: &[&str], user: &str) -> Update {
        let mut update = self.submit(nvrs, user);
        for nvr in nvrs {
            self.builds
                .move_build("f40-updates-candidate", "f40-updates-testing", nvr)
                .unwrap();
        }
        update.status = bodhi::db::models::UpdateStatus::Testing;
        update.request = None;
        update.pushed = true;
        update.save(&self.conn).unwrap();
        update
    }

    /// Tags currently carried by `nvr`
    pub fn tags(&self, nvr: &str) -> Vec<String> {
        self.builds.list_tags(nvr).unwrap()
    }

    pub fn vote(&self, update: &mut Update, author: &str, karma: i32) {
        self.lifecycle()
            .comment(update, author, NewComment::karma("Works for me", karma))
            .unwrap();
    }

    pub fn reload(&self, update: &Update) -> Update {
        Update::get_by_alias(&self.conn, &update.alias).unwrap()
    }
}
