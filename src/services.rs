// src/services.rs

//! External collaborators shared by the update and compose code

use crate::buildsys::{BuildSystem, DevBuildSystem};
use crate::compose::backend::{ComposeBackend, StagingBackend};
use crate::gating::{DecisionService, MemoryWaivers, NoPolicyDecisions, WaiverService};
use crate::notifications::{LogBus, MessageBus};
use std::path::Path;
use std::sync::Arc;

/// Handles to every service the core talks to
///
/// Cloning is cheap; compose jobs each take their own clone.
#[derive(Clone)]
pub struct Services {
    pub build_system: Arc<dyn BuildSystem>,
    pub decisions: Arc<dyn DecisionService>,
    pub waivers: Arc<dyn WaiverService>,
    pub bus: Arc<dyn MessageBus>,
    pub backend: Arc<dyn ComposeBackend>,
}

impl Services {
    pub fn new(
        build_system: Arc<dyn BuildSystem>,
        decisions: Arc<dyn DecisionService>,
        waivers: Arc<dyn WaiverService>,
        bus: Arc<dyn MessageBus>,
        backend: Arc<dyn ComposeBackend>,
    ) -> Self {
        Self {
            build_system,
            decisions,
            waivers,
            bus,
            backend,
        }
    }

    /// Local services: the given build system, no gating policies, bus
    /// messages logged and repositories staged under `compose_dir`
    pub fn local(build_system: DevBuildSystem, compose_dir: &Path) -> Self {
        Self {
            build_system: Arc::new(build_system),
            decisions: Arc::new(NoPolicyDecisions),
            waivers: Arc::new(MemoryWaivers::new()),
            bus: Arc::new(LogBus),
            backend: Arc::new(StagingBackend::new(compose_dir)),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
